//! # Dynamic Arena
//!
//! Packet memory taken from a general-purpose [`Heap`], for targets that
//! size the packet buffer at run time.
//!
//! A heap can only release the exact pointer it returned, but prepending a
//! header in place hands out a pointer into the middle of a heap block. The
//! arena therefore keeps a chunk table with one entry per heap block:
//!
//! ```text
//!  table entry                        heap block
//! +------------------+               +--------+------------------------+
//! | start ───────────┼──────────────▶| header | payload                |
//! | len              |               +--------+------------------------+
//! | used = true      |                        ▲
//! | chunks = [ ──────┼────────────────────────┘
//! +------------------+
//! ```
//!
//! Releasing the block start clears `used`, releasing a registered sub-chunk
//! removes it from `chunks`; the heap block goes back once both are gone.
//!
//! Heap blocks are zeroed when handed out and when they grow, so every byte a
//! snippet can read has been written.

use crate::backend::{ArenaStats, Backend};
use crate::heap::{Heap, SystemHeap};
use alloc::vec::Vec;
use core::fmt;
use core::ptr::{self, NonNull};
use log::{debug, trace, warn};

/// Address of a byte inside a heap block of a [`DynamicArena`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChunkPtr(*mut u8);

// Safety: a `ChunkPtr` is an address; it is only dereferenced by the arena
// that tracks it, under the arena lock.
unsafe impl Send for ChunkPtr {}
unsafe impl Sync for ChunkPtr {}

impl ChunkPtr {
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.addr()
    }

    #[must_use]
    pub const fn as_ptr(self) -> *const u8 {
        self.0
    }
}

impl From<NonNull<u8>> for ChunkPtr {
    fn from(value: NonNull<u8>) -> Self {
        Self(value.as_ptr())
    }
}

/// One heap block in use.
struct RangeEntry {
    start: NonNull<u8>,
    len: usize,
    /// Whether the block start itself is still handed out.
    used: bool,
    /// Sub-chunks handed out independently.
    chunks: Vec<ChunkPtr>,
}

impl RangeEntry {
    fn start(&self) -> ChunkPtr {
        self.start.into()
    }

    /// Whether `[ptr, ptr + len)` lies inside the block.
    fn covers(&self, ptr: ChunkPtr, len: usize) -> bool {
        let start = self.start.as_ptr().addr();
        let at = ptr.addr();
        at >= start && at.checked_add(len).is_some_and(|end| end <= start + self.len)
    }
}

/// How a pointer maps onto the chunk table.
#[derive(Copy, Clone)]
enum Resolved {
    /// Start of the block of entry `.0`.
    Start(usize),
    /// Sub-chunk `.1` of entry `.0`.
    Chunk(usize, usize),
}

impl Resolved {
    const fn entry(self) -> usize {
        match self {
            Self::Start(i) | Self::Chunk(i, _) => i,
        }
    }
}

/// Heap-backed arena with a chunk table for sub-chunk release.
pub struct DynamicArena<H: Heap = SystemHeap> {
    heap: H,
    table: Vec<RangeEntry>,
    max_ranges: usize,
    in_use: usize,
    peak: usize,
}

// Safety: the table exclusively owns the heap blocks it points to.
unsafe impl<H: Heap + Send> Send for DynamicArena<H> {}

impl<H: Heap> DynamicArena<H> {
    #[must_use]
    pub const fn new(heap: H) -> Self {
        Self {
            heap,
            table: Vec::new(),
            max_ranges: usize::MAX,
            in_use: 0,
            peak: 0,
        }
    }

    /// Bound the number of heap blocks tracked at once.
    #[must_use]
    pub fn with_max_ranges(mut self, max_ranges: usize) -> Self {
        self.max_ranges = max_ranges;
        self
    }

    #[must_use]
    pub const fn heap(&self) -> &H {
        &self.heap
    }

    /// Number of heap blocks in the chunk table.
    #[must_use]
    pub fn ranges(&self) -> usize {
        self.table.len()
    }

    /// Number of sub-chunks registered on the block that starts at `start`,
    /// or `None` if no tracked block starts there.
    #[must_use]
    pub fn chunks_of(&self, start: ChunkPtr) -> Option<usize> {
        self.table
            .iter()
            .find(|entry| entry.start() == start)
            .map(|entry| entry.chunks.len())
    }

    fn resolve(&self, ptr: ChunkPtr) -> Option<Resolved> {
        self.table.iter().enumerate().find_map(|(i, entry)| {
            if entry.start() == ptr {
                return Some(Resolved::Start(i));
            }
            entry
                .chunks
                .iter()
                .position(|&chunk| chunk == ptr)
                .map(|c| Resolved::Chunk(i, c))
        })
    }

    fn entry_covering(&self, ptr: ChunkPtr, len: usize) -> Option<&RangeEntry> {
        self.table.iter().find(|entry| entry.covers(ptr, len))
    }

    fn release_entry(&mut self, index: usize) {
        let entry = self.table.swap_remove(index);
        self.in_use -= entry.len;
        trace!("pktbuf: released {} heap bytes at {:#x}", entry.len, entry.start().addr());
        // Safety: the entry describes a live heap block that nothing references anymore.
        unsafe { self.heap.deallocate(entry.start, entry.len) };
    }
}

impl Default for DynamicArena<SystemHeap> {
    fn default() -> Self {
        Self::new(SystemHeap)
    }
}

impl<H: Heap> Drop for DynamicArena<H> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<H: Heap> fmt::Debug for DynamicArena<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicArena")
            .field("ranges", &self.table.len())
            .field("in_use", &self.in_use)
            .field("peak", &self.peak)
            .finish_non_exhaustive()
    }
}

impl<H: Heap> Backend for DynamicArena<H> {
    type Ptr = ChunkPtr;

    fn alloc(&mut self, size: usize) -> Option<ChunkPtr> {
        if size == 0 {
            return None;
        }
        let Some(start) = self.heap.allocate(size) else {
            debug!("pktbuf: heap refused {size} bytes");
            return None;
        };

        if self.table.len() >= self.max_ranges || self.table.try_reserve(1).is_err() {
            debug!("pktbuf: chunk table full, dropping {size} byte allocation");
            // Safety: `start` was just allocated with `size` bytes.
            unsafe { self.heap.deallocate(start, size) };
            return None;
        }

        // Safety: `start` is a fresh heap block of `size` bytes.
        unsafe { ptr::write_bytes(start.as_ptr(), 0, size) };

        self.table.push(RangeEntry {
            start,
            len: size,
            used: true,
            chunks: Vec::new(),
        });
        self.in_use += size;
        self.peak = self.peak.max(self.in_use);

        trace!("pktbuf: allocated {size} heap bytes at {:#x}", start.as_ptr().addr());
        Some(start.into())
    }

    fn realloc(&mut self, ptr: ChunkPtr, old_size: usize, size: usize) -> Option<ChunkPtr> {
        if size == 0 {
            return None;
        }
        let Some(resolved) = self.resolve(ptr) else {
            warn!("pktbuf: cannot resize {ptr:?}, not a tracked chunk");
            return None;
        };

        if let Resolved::Start(i) = resolved
            && self.table[i].chunks.is_empty()
        {
            let entry = &mut self.table[i];
            // Safety: the entry describes a live heap block of `entry.len` bytes.
            let moved = unsafe { self.heap.reallocate(entry.start, entry.len, size) }?;
            if size > entry.len {
                // Safety: the block now spans `size` bytes; the tail past the old length is fresh.
                unsafe { ptr::write_bytes(moved.as_ptr().add(entry.len), 0, size - entry.len) };
            }
            self.in_use = self.in_use - entry.len + size;
            self.peak = self.peak.max(self.in_use);
            entry.start = moved;
            entry.len = size;
            return Some(moved.into());
        }

        let entry = &self.table[resolved.entry()];
        let room = entry.start.as_ptr().addr() + entry.len - ptr.addr();
        let keep = old_size.min(size).min(room);

        let moved = self.alloc(size)?;
        // Safety: both ranges are inside live heap blocks; they are distinct blocks.
        unsafe { ptr::copy_nonoverlapping(ptr.0, moved.0, keep) };
        self.free(ptr);
        Some(moved)
    }

    fn free(&mut self, ptr: ChunkPtr) {
        let Some(resolved) = self.resolve(ptr) else {
            warn!("pktbuf: ignoring free of {ptr:?}, not a tracked chunk");
            return;
        };

        let index = resolved.entry();
        let entry = &mut self.table[index];
        match resolved {
            Resolved::Start(_) => entry.used = false,
            Resolved::Chunk(_, c) => {
                entry.chunks.swap_remove(c);
            }
        }

        if !entry.used && entry.chunks.is_empty() {
            self.release_entry(index);
        }
    }

    fn contains(&self, ptr: ChunkPtr) -> bool {
        self.resolve(ptr).is_some()
    }

    fn add_chunk(&mut self, ptr: ChunkPtr) -> bool {
        let Some(entry) = self.table.iter_mut().find(|entry| entry.covers(ptr, 0)) else {
            return false;
        };
        if entry.chunks.try_reserve(1).is_err() {
            debug!("pktbuf: no memory to register chunk {ptr:?}");
            return false;
        }
        entry.chunks.push(ptr);
        true
    }

    fn offset(ptr: ChunkPtr, count: usize) -> ChunkPtr {
        ChunkPtr(ptr.0.wrapping_add(count))
    }

    fn bytes(&self, ptr: ChunkPtr, len: usize) -> Option<&[u8]> {
        self.entry_covering(ptr, len)?;
        // Safety: the range lies inside a live heap block owned by this arena;
        // `&self` rules out concurrent mutation through the arena.
        Some(unsafe { core::slice::from_raw_parts(ptr.0, len) })
    }

    fn bytes_mut(&mut self, ptr: ChunkPtr, len: usize) -> Option<&mut [u8]> {
        self.entry_covering(ptr, len)?;
        // Safety: as in `bytes`; `&mut self` makes the returned slice unique.
        Some(unsafe { core::slice::from_raw_parts_mut(ptr.0, len) })
    }

    fn copy(&mut self, src: ChunkPtr, dst: ChunkPtr, len: usize) -> bool {
        if self.entry_covering(src, len).is_none() || self.entry_covering(dst, len).is_none() {
            return false;
        }
        // Safety: both ranges lie inside live heap blocks; `ptr::copy` allows overlap.
        unsafe { ptr::copy(src.0, dst.0, len) };
        true
    }

    fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn reset(&mut self) {
        while !self.table.is_empty() {
            self.release_entry(self.table.len() - 1);
        }
        self.in_use = 0;
        self.peak = 0;
    }

    fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: 0,
            in_use: self.in_use,
            peak: self.peak,
            regions: self.table.len(),
        }
    }
}
