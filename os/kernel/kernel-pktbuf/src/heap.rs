//! # Heap Allocators
//!
//! The general-purpose heap a [`DynamicArena`](crate::DynamicArena) sits on.

use crate::config::ALIGNMENT;
use alloc::alloc::{alloc, dealloc, realloc};
use core::alloc::Layout;
use core::ptr::NonNull;

/// A heap that can allocate, resize and free byte blocks.
///
/// Like C `free`, a heap can only release the exact pointer it returned;
/// offset pointers are resolved by the arena's chunk table before they get here.
pub trait Heap {
    /// Allocate `size > 0` bytes aligned to [`ALIGNMENT`]. The contents are
    /// unspecified.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Resize a block, moving it if necessary. On failure the old block is untouched.
    ///
    /// # Safety
    /// `ptr` must have been returned by this heap for a block of `old_size` bytes
    /// and must not have been released.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        size: usize,
    ) -> Option<NonNull<u8>>;

    /// Release a block.
    ///
    /// # Safety
    /// `ptr` must have been returned by this heap for a block of `size` bytes
    /// and must not have been released.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize);
}

/// The global allocator of the running kernel.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemHeap;

impl SystemHeap {
    #[inline]
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, ALIGNMENT).ok()
    }
}

impl Heap for SystemHeap {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Self::layout(size)?;
        // Safety: the layout has a non-zero size.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        size: usize,
    ) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Self::layout(old_size)?;
        Self::layout(size)?;
        // Safety: the caller guarantees `ptr` was allocated with `layout`;
        // `size` is non-zero and forms a valid layout with the same alignment.
        NonNull::new(unsafe { realloc(ptr.as_ptr(), layout, size) })
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = Self::layout(size) {
            // Safety: the caller guarantees `ptr` was allocated with `layout`.
            unsafe { dealloc(ptr.as_ptr(), layout) }
        }
    }
}

/// A heap with a byte budget, for bounding the memory a dynamic arena may
/// take from a shared heap.
#[derive(Debug, Default, Copy, Clone)]
pub struct LimitedHeap<H = SystemHeap> {
    inner: H,
    budget: usize,
    used: usize,
}

impl<H> LimitedHeap<H> {
    #[must_use]
    pub const fn new(inner: H, budget: usize) -> Self {
        Self {
            inner,
            budget,
            used: 0,
        }
    }

    /// Bytes currently handed out.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    fn fits(&self, size: usize) -> bool {
        self.used
            .checked_add(size)
            .is_some_and(|total| total <= self.budget)
    }
}

impl<H: Heap> Heap for LimitedHeap<H> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if !self.fits(size) {
            return None;
        }
        let ptr = self.inner.allocate(size)?;
        self.used += size;
        Some(ptr)
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        size: usize,
    ) -> Option<NonNull<u8>> {
        if size > old_size && !self.fits(size - old_size) {
            return None;
        }
        // Safety: forwarded from the caller.
        let moved = unsafe { self.inner.reallocate(ptr, old_size, size) }?;
        self.used = self.used - old_size + size;
        Some(moved)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        // Safety: forwarded from the caller.
        unsafe { self.inner.deallocate(ptr, size) };
        self.used = self.used.saturating_sub(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_heap_roundtrip() {
        let mut heap = SystemHeap;
        assert!(heap.allocate(0).is_none());
        let p = heap.allocate(16).expect("heap");
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
        let p = unsafe { heap.reallocate(p, 16, 64) }.expect("grow");
        unsafe { heap.deallocate(p, 64) };
    }

    #[test]
    fn limited_heap_enforces_budget() {
        let mut heap = LimitedHeap::new(SystemHeap, 32);
        let a = heap.allocate(20).expect("within budget");
        assert!(heap.allocate(20).is_none());
        assert_eq!(heap.used(), 20);

        assert!(unsafe { heap.reallocate(a, 20, 40) }.is_none());
        let a = unsafe { heap.reallocate(a, 20, 30) }.expect("within budget");
        assert_eq!(heap.used(), 30);

        unsafe { heap.deallocate(a, 30) };
        assert_eq!(heap.used(), 0);
    }
}
