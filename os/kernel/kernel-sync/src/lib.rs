//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: mutual exclusion for short critical sections.
//! * [`RefCount`]: atomic shared-ownership counter.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod ref_count;
mod spin_lock;

pub use ref_count::RefCount;
pub use spin_lock::{SpinLock, SpinLockGuard};
