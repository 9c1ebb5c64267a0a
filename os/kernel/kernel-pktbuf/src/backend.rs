//! # Arena Backends
//!
//! The raw memory operations underneath [`PktBuf`](crate::PktBuf). A backend
//! hands out regions, resolves *sub-chunks* (pointers into the middle of a
//! region that were registered via [`Backend::add_chunk`]) on release, and
//! gives bounds-checked access to region bytes.
//!
//! Backends are not synchronized; [`PktBuf`](crate::PktBuf) calls them with
//! its arena lock held.

use core::fmt::Debug;

/// Memory accounting of a backend.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes the backend can hand out in total (`0` for an unbounded heap).
    pub capacity: usize,
    /// Bytes currently allocated, bookkeeping headers included.
    pub in_use: usize,
    /// High-water mark of `in_use` (static arena: highest byte ever touched).
    pub peak: usize,
    /// Number of live regions.
    pub regions: usize,
}

/// Allocator interface shared by [`StaticArena`](crate::StaticArena) and
/// [`DynamicArena`](crate::DynamicArena).
pub trait Backend {
    /// Address of a byte inside the arena.
    type Ptr: Copy + Eq + Debug + Send;

    /// Allocate a region of `size` bytes. `None` when `size == 0` or no space is left.
    fn alloc(&mut self, size: usize) -> Option<Self::Ptr>;

    /// Resize the region at `ptr`, preserving `min(old_size, size)` bytes.
    ///
    /// Resizes in place where possible, otherwise moves the data. If `ptr` is
    /// a sub-chunk or shares its region with other chunks, the data always
    /// moves and only the registration of `ptr` is released.
    /// On failure nothing changes.
    fn realloc(&mut self, ptr: Self::Ptr, old_size: usize, size: usize) -> Option<Self::Ptr>;

    /// Release `ptr`, which must be a region start or a registered sub-chunk.
    ///
    /// The region itself is returned once its start and all of its sub-chunks
    /// are released. Unknown pointers are ignored.
    fn free(&mut self, ptr: Self::Ptr);

    /// Whether `ptr` is managed by this backend.
    fn contains(&self, ptr: Self::Ptr) -> bool;

    /// Register `ptr`, which lies inside a live region, as an independently
    /// releasable sub-chunk of that region.
    ///
    /// Returns `false` if `ptr` is not inside a live region or the bookkeeping
    /// for it cannot be allocated.
    fn add_chunk(&mut self, ptr: Self::Ptr) -> bool;

    /// `ptr` advanced by `count` bytes.
    fn offset(ptr: Self::Ptr, count: usize) -> Self::Ptr;

    /// `len` bytes starting at `ptr`, if they lie inside the arena.
    fn bytes(&self, ptr: Self::Ptr, len: usize) -> Option<&[u8]>;

    /// Mutable variant of [`bytes`](Self::bytes).
    fn bytes_mut(&mut self, ptr: Self::Ptr, len: usize) -> Option<&mut [u8]>;

    /// Copy `len` bytes from `src` to `dst`; `false` if either range is invalid.
    fn copy(&mut self, src: Self::Ptr, dst: Self::Ptr, len: usize) -> bool;

    /// Whether no region is allocated.
    fn is_empty(&self) -> bool;

    /// Forget every allocation and return to the initial state.
    fn reset(&mut self);

    fn stats(&self) -> ArenaStats;
}
