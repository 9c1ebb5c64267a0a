//! # Static Arena
//!
//! A first-fit, split-and-coalesce allocator over one fixed byte array, for
//! targets without a heap or with a hard memory bound.
//!
//! ## Layout
//!
//! The array is tiled by regions, each starting with an 8 byte header:
//!
//! ```text
//! 0        8                                                            N
//! +--------+--------+-----------+--------+----------------+--------+----+
//! | anchor | header |  payload  | header |   free bytes   | header | .. |
//! +--------+--------+-----------+--------+----------------+--------+----+
//!  free     used                 free                      used
//! ```
//!
//! - **Free** header: `next` offset of the following free region (`0` ends
//!   the list) and `size`, the free bytes after the header. Free regions are
//!   linked in ascending address order and adjacent ones are always merged.
//! - **Used** header: the number of registered holders (region start plus
//!   sub-chunks) tagged with [`USED`], and the payload `size`.
//! - The **anchor** at offset 0 is a free header that is never handed out.
//!   It heads the list, possibly with zero free bytes.
//!
//! All offsets and sizes are multiples of [`ALIGNMENT`]. Everything is index
//! based, so every access is bounds checked.

use crate::backend::{ArenaStats, Backend};
use crate::config::ALIGNMENT;
use core::fmt;
use log::{debug, trace, warn};

/// Size of a region header.
const HEADER_SIZE: usize = 8;

/// Offset of the anchor descriptor.
const HEAD: usize = 0;

/// `next` value terminating the free list. The anchor is never anyone's successor.
const NONE: usize = 0;

/// Tag bit distinguishing used headers from free ones.
const USED: u32 = 1 << 31;

/// Align `value` upwards to `align` (must be a power of two).
#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

/// Offset of a byte inside a [`StaticArena`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaOffset(usize);

impl ArenaOffset {
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Fixed-capacity arena of `N` bytes.
///
/// # Invariants
/// - Regions tile `[0, N)` exactly.
/// - The free list starts at the anchor, is sorted by address, and contains
///   every free region; no two free regions are adjacent.
/// - A used region has at least one holder.
pub struct StaticArena<const N: usize> {
    buf: [u8; N],
    /// Highest offset ever covered by a used region.
    peak: usize,
}

impl<const N: usize> StaticArena<N> {
    const VALID: () = assert!(
        N.is_multiple_of(ALIGNMENT) && N >= 4 * HEADER_SIZE && N < 1 << 31,
        "StaticArena capacity must be 4-byte aligned, at least 32 bytes and below 2 GiB"
    );

    /// Largest region a fresh arena can hand out: the capacity minus the
    /// anchor and one region header.
    pub const MAX_ALLOC: usize = N - 2 * HEADER_SIZE;

    #[must_use]
    pub fn new() -> Self {
        let () = Self::VALID;
        let mut arena = Self {
            buf: [0; N],
            peak: 0,
        };
        arena.reset();
        arena
    }

    #[inline]
    fn word(&self, at: usize) -> u32 {
        let mut raw = [0; 4];
        raw.copy_from_slice(&self.buf[at..at + 4]);
        u32::from_ne_bytes(raw)
    }

    #[inline]
    fn set_word(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Offsets and sizes are below `N < 2^31`, so they always fit a header word.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    const fn to_word(value: usize) -> u32 {
        value as u32
    }

    #[inline]
    fn is_used(&self, at: usize) -> bool {
        self.word(at) & USED != 0
    }

    /// `next` of a free header.
    #[inline]
    fn link(&self, at: usize) -> usize {
        self.word(at) as usize
    }

    #[inline]
    fn set_link(&mut self, at: usize, next: usize) {
        self.set_word(at, Self::to_word(next));
    }

    /// Holder count of a used header.
    #[inline]
    fn holders(&self, at: usize) -> u32 {
        self.word(at) & !USED
    }

    #[inline]
    fn set_holders(&mut self, at: usize, holders: u32) {
        self.set_word(at, USED | holders);
    }

    /// Bytes after the header of the region at `at`, free or used.
    #[inline]
    fn region_size(&self, at: usize) -> usize {
        self.word(at + 4) as usize
    }

    #[inline]
    fn set_region_size(&mut self, at: usize, size: usize) {
        self.set_word(at + 4, Self::to_word(size));
    }

    #[inline]
    fn end_of(&self, at: usize) -> usize {
        at + HEADER_SIZE + self.region_size(at)
    }

    fn write_free(&mut self, at: usize, next: usize, size: usize) {
        self.set_link(at, next);
        self.set_region_size(at, size);
    }

    fn write_used(&mut self, at: usize, holders: u32, size: usize) {
        self.set_holders(at, holders);
        self.set_region_size(at, size);
    }

    /// The used region whose payload contains `offset`.
    fn region_of(&self, offset: usize) -> Option<usize> {
        let mut at = HEAD;
        while at < N {
            let end = self.end_of(at);
            if offset < end {
                return (self.is_used(at) && offset >= at + HEADER_SIZE).then_some(at);
            }
            at = end;
        }
        None
    }

    /// The free region whose `next` is `target` (the anchor if none precedes it).
    fn free_predecessor(&self, target: usize) -> usize {
        let mut at = HEAD;
        loop {
            let next = self.link(at);
            if next == target || next == NONE {
                return at;
            }
            at = next;
        }
    }

    /// Turn the used region at `region` into free space, merging it with
    /// the free regions on either side.
    fn release_region(&mut self, region: usize) {
        let total = HEADER_SIZE + self.region_size(region);

        let mut prev = HEAD;
        let mut next = self.link(HEAD);
        while next != NONE && next < region {
            prev = next;
            next = self.link(next);
        }

        let merged = if self.end_of(prev) == region {
            self.set_region_size(prev, self.region_size(prev) + total);
            prev
        } else {
            self.write_free(region, next, total - HEADER_SIZE);
            self.set_link(prev, region);
            region
        };

        if next != NONE && self.end_of(merged) == next {
            let size = self.region_size(merged) + HEADER_SIZE + self.region_size(next);
            let after = self.link(next);
            self.write_free(merged, after, size);
        }
    }

    /// Give the bytes behind the first `payload` bytes of `region` back.
    fn shrink(&mut self, region: usize, payload: usize) {
        let remainder = self.region_size(region) - payload;
        if remainder < HEADER_SIZE {
            return;
        }
        self.set_region_size(region, payload);
        let tail = region + HEADER_SIZE + payload;
        self.write_used(tail, 1, remainder - HEADER_SIZE);
        self.release_region(tail);
    }

    /// Extend `region` into the free region directly behind it.
    fn grow_in_place(&mut self, region: usize, payload: usize) -> bool {
        let end = self.end_of(region);
        if end >= N || self.is_used(end) {
            return false;
        }

        let available = self.region_size(region) + HEADER_SIZE + self.region_size(end);
        if available < payload {
            return false;
        }

        let prev = self.free_predecessor(end);
        let next = self.link(end);
        let remainder = available - payload;
        let (payload, successor) = if remainder >= HEADER_SIZE {
            let tail = region + HEADER_SIZE + payload;
            self.write_free(tail, next, remainder - HEADER_SIZE);
            (payload, tail)
        } else {
            (available, next)
        };
        self.set_link(prev, successor);
        self.set_region_size(region, payload);
        self.peak = self.peak.max(self.end_of(region));
        true
    }

    /// Free regions as `(offset, free bytes)`, anchor first.
    pub fn free_regions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        core::iter::successors(Some(HEAD), move |&at| {
            let next = self.link(at);
            (next != NONE).then_some(next)
        })
        .map(move |at| (at, self.region_size(at)))
    }

    #[inline]
    fn in_payload_space(ptr: ArenaOffset, len: usize) -> Option<core::ops::Range<usize>> {
        let end = ptr.0.checked_add(len)?;
        (ptr.0 >= HEADER_SIZE && end <= N).then_some(ptr.0..end)
    }
}

impl<const N: usize> Default for StaticArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for StaticArena<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticArena")
            .field("capacity", &N)
            .field("free_regions", &self.free_regions().count())
            .field("peak", &self.peak)
            .finish()
    }
}

impl<const N: usize> Backend for StaticArena<N> {
    type Ptr = ArenaOffset;

    fn alloc(&mut self, size: usize) -> Option<ArenaOffset> {
        if size == 0 || size > Self::MAX_ALLOC {
            return None;
        }

        let payload = align_up(size, ALIGNMENT);
        let need = HEADER_SIZE + payload;

        let mut prev = HEAD;
        let mut current = HEAD;
        loop {
            let next = self.link(current);
            let free = self.region_size(current);

            // The anchor keeps its header; any other free region is reused whole.
            let (start, available) = if current == HEAD {
                (HEADER_SIZE, free)
            } else {
                (current, HEADER_SIZE + free)
            };

            if available >= need {
                let remainder = available - need;
                let (payload, successor) = if remainder >= HEADER_SIZE {
                    let tail = start + need;
                    self.write_free(tail, next, remainder - HEADER_SIZE);
                    (payload, tail)
                } else {
                    (payload + remainder, next)
                };

                if current == HEAD {
                    self.write_free(HEAD, successor, 0);
                } else {
                    self.set_link(prev, successor);
                }
                self.write_used(start, 1, payload);
                self.peak = self.peak.max(start + HEADER_SIZE + payload);

                trace!("pktbuf: allocated {payload} bytes at offset {:#x}", start + HEADER_SIZE);
                return Some(ArenaOffset(start + HEADER_SIZE));
            }

            if next == NONE {
                debug!("pktbuf: no free region for {size} bytes");
                return None;
            }
            prev = current;
            current = next;
        }
    }

    fn realloc(&mut self, ptr: ArenaOffset, old_size: usize, size: usize) -> Option<ArenaOffset> {
        if size == 0 || size > Self::MAX_ALLOC {
            return None;
        }
        let Some(region) = self.region_of(ptr.0) else {
            warn!("pktbuf: cannot resize {ptr:?}, not an allocated region");
            return None;
        };

        if ptr.0 == region + HEADER_SIZE && self.holders(region) == 1 {
            let payload = align_up(size, ALIGNMENT);
            if payload <= self.region_size(region) {
                self.shrink(region, payload);
                return Some(ptr);
            }
            if self.grow_in_place(region, payload) {
                return Some(ptr);
            }
        }

        let keep = old_size.min(size).min(self.end_of(region) - ptr.0);
        let moved = self.alloc(size)?;
        self.buf.copy_within(ptr.0..ptr.0 + keep, moved.0);
        self.free(ptr);
        Some(moved)
    }

    fn free(&mut self, ptr: ArenaOffset) {
        let Some(region) = self.region_of(ptr.0) else {
            warn!("pktbuf: ignoring free of {ptr:?}, not an allocated region");
            return;
        };

        let holders = self.holders(region);
        if holders > 1 {
            self.set_holders(region, holders - 1);
            return;
        }

        trace!("pktbuf: released region at offset {:#x}", region + HEADER_SIZE);
        self.release_region(region);
    }

    fn contains(&self, ptr: ArenaOffset) -> bool {
        ptr.0 >= HEADER_SIZE && ptr.0 < N
    }

    fn add_chunk(&mut self, ptr: ArenaOffset) -> bool {
        let Some(region) = self.region_of(ptr.0) else {
            return false;
        };
        let holders = self.holders(region);
        if holders >= !USED {
            return false;
        }
        self.set_holders(region, holders + 1);
        true
    }

    fn offset(ptr: ArenaOffset, count: usize) -> ArenaOffset {
        ArenaOffset(ptr.0 + count)
    }

    fn bytes(&self, ptr: ArenaOffset, len: usize) -> Option<&[u8]> {
        Self::in_payload_space(ptr, len).map(|range| &self.buf[range])
    }

    fn bytes_mut(&mut self, ptr: ArenaOffset, len: usize) -> Option<&mut [u8]> {
        Self::in_payload_space(ptr, len).map(|range| &mut self.buf[range])
    }

    fn copy(&mut self, src: ArenaOffset, dst: ArenaOffset, len: usize) -> bool {
        match (Self::in_payload_space(src, len), Self::in_payload_space(dst, len)) {
            (Some(from), Some(to)) => {
                self.buf.copy_within(from, to.start);
                true
            }
            _ => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.link(HEAD) == NONE && self.region_size(HEAD) == N - HEADER_SIZE
    }

    fn reset(&mut self) {
        self.write_free(HEAD, NONE, N - HEADER_SIZE);
        self.peak = 0;
    }

    fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            capacity: N,
            peak: self.peak,
            ..ArenaStats::default()
        };
        let mut at = HEAD;
        while at < N {
            if self.is_used(at) {
                stats.in_use += HEADER_SIZE + self.region_size(at);
                stats.regions += 1;
            }
            at = self.end_of(at);
        }
        stats
    }
}
