//! # Kernel Packet Buffer
//!
//! The memory pool network packets live in on their way through the stack.
//! A packet is a chain of typed, sized *snippets* (one per protocol layer)
//! whose bytes are allocated from a single arena.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 PktBuf<B, SNIPS>                    │
//! │    • Snippet record pool and lifecycle              │
//! │    • Shared ownership (hold / release)              │
//! │    • Copy-on-write (start_write)                    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ SpinLock
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Backend                             │
//! │    StaticArena<N>          DynamicArena<H: Heap>    │
//! │    • fixed byte array      • heap blocks            │
//! │    • sorted free list      • chunk table            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Snippets ([`snip`], [`chain`])
//!
//! Callers hold [`Snip`] handles; the records behind them (successor, data,
//! size, [`ProtoType`]) belong to the [`PktBuf`]. A released handle is
//! detected and rejected, it never aliases a newer snippet.
//!
//! ### Backends ([`static_arena`], `dynamic_arena`)
//!
//! * [`StaticArena`]: first-fit allocation with coalescing over a fixed array,
//!   for a hard memory bound and no heap.
//! * `DynamicArena`: blocks from a `Heap`, plus a chunk table so that
//!   headers carved in place can be released on their own. Needs the
//!   `alloc` feature (on by default).
//!
//! The build-time `PKTBUF_SIZE` picks the [`DefaultBackend`] (see [`config`]).
//! Snippet records are kept in a fixed pool inside the [`PktBuf`], so a
//! buffer on a [`StaticArena`] works without a heap.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_pktbuf::{HeaderData, PktBuf, ProtoType, StaticArena};
//!
//! let pktbuf: PktBuf<_, 16> = PktBuf::new(StaticArena::<512>::new());
//!
//! let payload = pktbuf.insert(Some(b"\x11\x22hello world!".as_slice()), 14).unwrap();
//! let udp = pktbuf
//!     .add_header(Some(payload), HeaderData::Front, 2, ProtoType::Udp)
//!     .unwrap();
//!
//! assert_eq!(pktbuf.next(udp), Ok(Some(payload)));
//! assert_eq!(pktbuf.length(Some(udp)), 14);
//! pktbuf.read(payload, |bytes| assert_eq!(bytes, b"hello world!")).unwrap();
//!
//! pktbuf.release(udp).unwrap();
//! pktbuf.release(payload).unwrap();
//! assert!(pktbuf.is_empty());
//! ```
//!
//! ## Concurrency
//!
//! [`PktBuf::hold`] and [`PktBuf::release`] are lock-free except for the
//! final release. Every structural operation takes the arena [`SpinLock`]
//! (from `kernel-sync`), which does not mask interrupts: allocating from
//! interrupt context is not supported.
//!
//! [`SpinLock`]: kernel_sync::SpinLock

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod backend;
pub mod chain;
pub mod config;
#[cfg(feature = "alloc")]
pub mod dynamic_arena;
mod error;
#[cfg(feature = "alloc")]
pub mod heap;
mod pktbuf;
pub mod snip;
pub mod static_arena;

pub use backend::{ArenaStats, Backend};
pub use config::{DEFAULT_MAX_SNIPS, DefaultBackend, PKTBUF_SIZE};
#[cfg(feature = "alloc")]
pub use dynamic_arena::{ChunkPtr, DynamicArena};
pub use error::{PktBufError, Result};
#[cfg(feature = "alloc")]
pub use heap::{Heap, LimitedHeap, SystemHeap};
pub use pktbuf::{PktBuf, PktBufStats};
pub use snip::{HeaderData, PKTSIZE_MAX, PktSize, ProtoType, Snip};
pub use static_arena::{ArenaOffset, StaticArena};
