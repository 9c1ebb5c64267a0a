//! # Packet Buffer
//!
//! [`PktBuf`] manages snippet records on top of an arena [`Backend`].
//!
//! Records live in a pool of `SNIPS` entries inside the `PktBuf` itself, so a
//! buffer on a [`StaticArena`](crate::StaticArena) needs no heap at all. Each
//! pool slot has a `users` counter and a generation next to it; both are
//! atomics outside the arena lock so that [`hold`](PktBuf::hold) and
//! [`release`](PktBuf::release) only take the lock for the final release.
//! Everything that touches records or backend memory runs under the arena
//! [`SpinLock`].
//!
//! ```text
//!            slots (lock-free)            SpinLock<State>
//!          +-------+------------+      +-----------------------+
//!  Snip ──▶| users | generation |      | backend   | records[] |
//!          +-------+------------+      +-----------------------+
//! ```

use crate::backend::{ArenaStats, Backend};
use crate::chain::{self, SnipChain};
use crate::config::{DEFAULT_MAX_SNIPS, DefaultBackend};
use crate::error::{PktBufError, Result};
use crate::snip::{HeaderData, PktSize, ProtoType, Snip, SnipData, SnipRecord, pkt_size};
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_sync::{RefCount, SpinLock};
use log::{debug, trace};

/// Lock-free part of a record slot.
#[derive(Debug, Default)]
struct Slot {
    users: RefCount,
    generation: AtomicU32,
}

impl Slot {
    const fn new() -> Self {
        Self {
            users: RefCount::new(0),
            generation: AtomicU32::new(0),
        }
    }
}

/// Everything behind the arena lock.
struct State<B: Backend, const SNIPS: usize> {
    backend: B,
    records: [Option<SnipRecord<B::Ptr>>; SNIPS],
}

/// Usage figures of a [`PktBuf`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PktBufStats {
    pub arena: ArenaStats,
    /// Live snippet records.
    pub snips: usize,
}

/// The packet buffer: snippet lifecycle on top of an arena backend.
///
/// `SNIPS` is the size of the snippet record pool, the most snippets that
/// can be live at once. The pool is part of the `PktBuf`, it is not taken
/// from the arena or the heap.
///
/// All operations take `&self`; share a `PktBuf` between threads by reference
/// or `Arc`. None of them block on anything but the arena lock, and every
/// failure leaves the buffer as it was.
pub struct PktBuf<B: Backend = DefaultBackend, const SNIPS: usize = DEFAULT_MAX_SNIPS> {
    state: SpinLock<State<B, SNIPS>>,
    slots: [Slot; SNIPS],
}

impl PktBuf<DefaultBackend> {
    /// A packet buffer on the backend selected by `PKTBUF_SIZE`.
    #[must_use]
    pub fn with_default_backend() -> Self {
        Self::new(DefaultBackend::default())
    }
}

impl<B: Backend + Default, const SNIPS: usize> Default for PktBuf<B, SNIPS> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: Backend, const SNIPS: usize> PktBuf<B, SNIPS> {
    const VALID: () = assert!(
        SNIPS > 0 && SNIPS <= u32::MAX as usize,
        "PktBuf needs between 1 and u32::MAX snippet records"
    );

    #[must_use]
    pub const fn new(backend: B) -> Self {
        let () = Self::VALID;
        Self {
            state: SpinLock::new(State {
                backend,
                records: [const { None }; SNIPS],
            }),
            slots: [const { Slot::new() }; SNIPS],
        }
    }

    fn with_locked<R>(&self, f: impl FnOnce(&mut Locked<'_, B, SNIPS>) -> R) -> R {
        let mut state = self.state.lock();
        let mut locked = Locked {
            state: &mut *state,
            slots: &self.slots,
        };
        f(&mut locked)
    }

    /// The slot of `snip`, if its generation is current.
    fn slot(&self, snip: Snip) -> Result<&Slot> {
        self.slots
            .get(snip.index())
            .filter(|slot| slot.generation.load(Ordering::Acquire) == snip.generation)
            .ok_or(PktBufError::StaleSnip)
    }

    /// Allocate a snippet of `size` bytes of type [`ProtoType::Unknown`] with
    /// one user. The bytes are initialized but their contents are unspecified.
    ///
    /// # Errors
    /// [`ZeroSize`](PktBufError::ZeroSize) for `size == 0`,
    /// [`OutOfMemory`](PktBufError::OutOfMemory) or
    /// [`OutOfRecords`](PktBufError::OutOfRecords) on exhaustion.
    pub fn alloc(&self, size: PktSize) -> Result<Snip> {
        self.with_locked(|locked| {
            locked
                .alloc_snip(size, ProtoType::Unknown, None)
                .map(|(snip, _)| snip)
        })
    }

    /// Like [`alloc`](Self::alloc), then copy the first `size` bytes of `data` in.
    ///
    /// # Errors
    /// As [`alloc`](Self::alloc), and
    /// [`SourceTooShort`](PktBufError::SourceTooShort) if `data` holds fewer
    /// than `size` bytes.
    pub fn insert(&self, data: Option<&[u8]>, size: PktSize) -> Result<Snip> {
        let source = data.map(|data| source_prefix(data, size)).transpose()?;
        self.with_locked(|locked| {
            let (snip, ptr) = locked.alloc_snip(size, ProtoType::Unknown, None)?;
            if let Some(source) = source {
                locked.fill(snip, ptr, source)?;
            }
            Ok(snip)
        })
    }

    /// Wrap caller-owned bytes in a snippet without copying.
    ///
    /// The data is not arena memory: [`contains`](Self::contains) is false
    /// for it and releasing the snippet only frees its record.
    ///
    /// # Errors
    /// [`ZeroSize`](PktBufError::ZeroSize) for an empty slice,
    /// [`TooLarge`](PktBufError::TooLarge) beyond [`PktSize::MAX`] bytes,
    /// [`OutOfRecords`](PktBufError::OutOfRecords) on exhaustion.
    pub fn wrap_static(&self, data: &'static [u8], proto: ProtoType) -> Result<Snip> {
        let size = pkt_size(data.len())?;
        if size == 0 {
            return Err(PktBufError::ZeroSize);
        }
        self.with_locked(|locked| {
            let index = locked.vacant()?;
            Ok(locked.create(
                index,
                SnipRecord {
                    next: None,
                    data: SnipData::External(data),
                    size,
                    proto,
                },
            ))
        })
    }

    /// Prepend a header of `size` bytes to `pkt`.
    ///
    /// With [`HeaderData::Front`] the header is carved from the first `size`
    /// bytes of `pkt` without copying: the header takes over the start of the
    /// data, `pkt` shrinks by `size` and its data moves forward. Otherwise
    /// fresh space is allocated and optionally filled. The header's `next` is
    /// `pkt` either way.
    ///
    /// # Errors
    /// - [`ZeroSize`](PktBufError::ZeroSize) for `size == 0`.
    /// - [`MissingPacket`](PktBufError::MissingPacket) for an in-place header without `pkt`.
    /// - [`TooLarge`](PktBufError::TooLarge) if an in-place header would take all of `pkt`.
    /// - [`Shared`](PktBufError::Shared) if `pkt` is carved while it has other users.
    /// - [`SourceTooShort`](PktBufError::SourceTooShort) if the source holds fewer than `size` bytes.
    /// - [`StaleSnip`](PktBufError::StaleSnip) if `pkt` was released.
    /// - [`OutOfMemory`](PktBufError::OutOfMemory) or
    ///   [`OutOfRecords`](PktBufError::OutOfRecords) on exhaustion.
    pub fn add_header(
        &self,
        pkt: Option<Snip>,
        data: HeaderData<'_>,
        size: PktSize,
        proto: ProtoType,
    ) -> Result<Snip> {
        if size == 0 {
            return Err(PktBufError::ZeroSize);
        }
        match data {
            HeaderData::Front => {
                let pkt = pkt.ok_or(PktBufError::MissingPacket)?;
                self.with_locked(|locked| locked.carve_front(pkt, size, proto))
            }
            HeaderData::Empty => self.with_locked(|locked| locked.fresh_header(pkt, None, size, proto)),
            HeaderData::Bytes(bytes) => {
                let source = source_prefix(bytes, size)?;
                self.with_locked(|locked| locked.fresh_header(pkt, Some(source), size, proto))
            }
        }
    }

    /// Add a user to `snip` and return the new count.
    ///
    /// Lock-free. The caller must hold a reference to `snip` itself.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn hold(&self, snip: Snip) -> Result<u32> {
        self.hold_slot(self.slot(snip)?, snip)
    }

    /// Count a user on `slot`, then make sure it still belongs to `snip`.
    fn hold_slot(&self, slot: &Slot, snip: Snip) -> Result<u32> {
        let users = slot.users.try_increment().ok_or(PktBufError::StaleSnip)?;
        let generation = slot.generation.load(Ordering::Acquire);
        if generation == snip.generation {
            return Ok(users);
        }

        // The record was reused in between; hand the user back to its new owner.
        if slot.users.decrement() == Some(0) {
            let owner = Snip {
                index: snip.index,
                generation,
            };
            self.with_locked(|locked| locked.destroy(owner));
        }
        Err(PktBufError::StaleSnip)
    }

    /// Drop a user of `snip`.
    ///
    /// The last release frees the snippet's arena data (if it is arena memory)
    /// and its record. Snippets linked through `next` are not released.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was already released.
    pub fn release(&self, snip: Snip) -> Result<()> {
        match self.slot(snip)?.users.decrement() {
            None => Err(PktBufError::StaleSnip),
            Some(0) => {
                self.with_locked(|locked| locked.destroy(snip));
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Make sure the caller owns the chain starting at `snip` exclusively.
    ///
    /// Returns `snip` itself if it has a single user. Otherwise the chain is
    /// duplicated (same order, sizes, types and bytes), the caller's user of
    /// the original is dropped and the copy is returned.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released,
    /// [`OutOfMemory`](PktBufError::OutOfMemory) or
    /// [`OutOfRecords`](PktBufError::OutOfRecords) if the copy does not fit;
    /// the original is untouched then.
    pub fn start_write(&self, snip: Snip) -> Result<Snip> {
        match self.slot(snip)?.users.get() {
            0 => Err(PktBufError::StaleSnip),
            1 => Ok(snip),
            _ => {
                let copy = self.with_locked(|locked| locked.duplicate(snip))?;
                if let Err(err) = self.release(snip) {
                    self.with_locked(|locked| locked.destroy_chain(Some(copy)));
                    return Err(err);
                }
                Ok(copy)
            }
        }
    }

    /// Resize the data of `snip`, keeping the first `min(old, new)` bytes.
    ///
    /// # Errors
    /// - [`ZeroSize`](PktBufError::ZeroSize) for `size == 0`.
    /// - [`NotOwned`](PktBufError::NotOwned) if the data is not arena memory.
    /// - [`Shared`](PktBufError::Shared) if `snip` has other users.
    /// - [`Chained`](PktBufError::Chained) if `snip` has a successor.
    /// - [`OutOfMemory`](PktBufError::OutOfMemory) if the data cannot grow.
    pub fn realloc_data(&self, snip: Snip, size: PktSize) -> Result<()> {
        if size == 0 {
            return Err(PktBufError::ZeroSize);
        }
        self.with_locked(|locked| locked.realloc_data(snip, size))
    }

    /// Whether `ptr` is managed by the arena backend.
    #[must_use]
    pub fn contains(&self, ptr: B::Ptr) -> bool {
        self.with_locked(|locked| locked.state.backend.contains(ptr))
    }

    /// Size of the data of `snip`.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn size(&self, snip: Snip) -> Result<PktSize> {
        self.with_locked(|locked| locked.record(snip).map(|record| record.size))
    }

    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn proto(&self, snip: Snip) -> Result<ProtoType> {
        self.with_locked(|locked| locked.record(snip).map(|record| record.proto))
    }

    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released,
    /// [`Shared`](PktBufError::Shared) if it has other users.
    pub fn set_proto(&self, snip: Snip, proto: ProtoType) -> Result<()> {
        self.with_locked(|locked| {
            locked.exclusive(snip)?.proto = proto;
            Ok(())
        })
    }

    /// Current number of users of `snip`; a snapshot while others hold it.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn users(&self, snip: Snip) -> Result<u32> {
        match self.slot(snip)?.users.get() {
            0 => Err(PktBufError::StaleSnip),
            users => Ok(users),
        }
    }

    /// Successor of `snip` in its chain.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn next(&self, snip: Snip) -> Result<Option<Snip>> {
        self.with_locked(|locked| {
            locked.record(snip)?;
            Ok(SnipChain::next(&*locked, snip))
        })
    }

    /// Backend pointer to the data of `snip`; `None` for caller-owned data.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn data_ptr(&self, snip: Snip) -> Result<Option<B::Ptr>> {
        self.with_locked(|locked| {
            locked.record(snip).map(|record| match record.data {
                SnipData::Arena(ptr) => Some(ptr),
                SnipData::External(_) => None,
            })
        })
    }

    /// Run `f` on the data of `snip`.
    ///
    /// `f` runs with the arena lock held and must not call back into the buffer.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released.
    pub fn read<R>(&self, snip: Snip, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.with_locked(|locked| {
            let record = *locked.record(snip)?;
            let bytes = match record.data {
                SnipData::Arena(ptr) => locked
                    .state
                    .backend
                    .bytes(ptr, usize::from(record.size))
                    .ok_or(PktBufError::NotOwned)?,
                SnipData::External(bytes) => bytes,
            };
            Ok(f(bytes))
        })
    }

    /// Run `f` on the data of `snip` for modification.
    ///
    /// Needs exclusive ownership; call [`start_write`](Self::start_write) first.
    /// `f` runs with the arena lock held and must not call back into the buffer.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `snip` was released,
    /// [`Shared`](PktBufError::Shared) if it has other users,
    /// [`NotOwned`](PktBufError::NotOwned) for caller-owned data.
    pub fn write<R>(&self, snip: Snip, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.with_locked(|locked| {
            let record = *locked.exclusive(snip)?;
            let SnipData::Arena(ptr) = record.data else {
                return Err(PktBufError::NotOwned);
            };
            let bytes = locked
                .state
                .backend
                .bytes_mut(ptr, usize::from(record.size))
                .ok_or(PktBufError::NotOwned)?;
            Ok(f(bytes))
        })
    }

    /// Move `cursor` to its successor and return it.
    pub fn advance(&self, cursor: &mut Option<Snip>) -> Option<Snip> {
        self.with_locked(|locked| chain::advance(&*locked, cursor))
    }

    /// Total number of data bytes in the chain starting at `head`.
    #[must_use]
    pub fn length(&self, head: Option<Snip>) -> usize {
        self.with_locked(|locked| chain::length(&*locked, head))
    }

    /// Number of snippets in the chain starting at `head`.
    #[must_use]
    pub fn count(&self, head: Option<Snip>) -> usize {
        self.with_locked(|locked| chain::count(&*locked, head))
    }

    /// Splice `node` in right after the head of the chain, or make it the
    /// head of an empty chain. Adding a node that is already in the chain
    /// changes nothing.
    ///
    /// # Errors
    /// [`StaleSnip`](PktBufError::StaleSnip) if `node` or the head was released.
    pub fn add(&self, head: &mut Option<Snip>, node: Snip) -> Result<()> {
        self.with_locked(|locked| {
            locked.record(node)?;
            if let Some(first) = *head {
                locked.record(first)?;
            }
            let mut cursor = *head;
            while let Some(current) = cursor {
                if current == node {
                    return Ok(());
                }
                chain::advance(&*locked, &mut cursor);
            }
            chain::add(locked, head, node);
            Ok(())
        })
    }

    /// Unlink `node` from the chain; nothing happens if it is not part of it.
    pub fn remove(&self, head: &mut Option<Snip>, node: Snip) {
        self.with_locked(|locked| chain::remove(locked, head, node));
    }

    /// Whether no snippet and no arena memory is in use.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.with_locked(|locked| {
            locked.state.backend.is_empty() && locked.state.records.iter().all(Option::is_none)
        })
    }

    /// Drop every snippet and reset the arena. All outstanding handles become stale.
    pub fn reset(&self) {
        self.with_locked(|locked| {
            locked.state.backend.reset();
            locked.state.records.iter_mut().for_each(|record| *record = None);
            for slot in locked.slots {
                slot.users.reset(0);
                slot.generation.fetch_add(1, Ordering::Release);
            }
        });
    }

    #[must_use]
    pub fn stats(&self) -> PktBufStats {
        self.with_locked(|locked| PktBufStats {
            arena: locked.state.backend.stats(),
            snips: locked.state.records.iter().filter(|record| record.is_some()).count(),
        })
    }
}

impl<B: Backend, const SNIPS: usize> fmt::Debug for PktBuf<B, SNIPS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PktBuf")
            .field("max_snips", &SNIPS)
            .field("state", &self.state)
            .finish()
    }
}

/// The first `size` bytes of `data`.
fn source_prefix(data: &[u8], size: PktSize) -> Result<&[u8]> {
    let expected = usize::from(size);
    data.get(..expected).ok_or(PktBufError::SourceTooShort {
        expected,
        actual: data.len(),
    })
}

/// The record pool with the arena lock held.
struct Locked<'a, B: Backend, const SNIPS: usize> {
    state: &'a mut State<B, SNIPS>,
    slots: &'a [Slot],
}

impl<B: Backend, const SNIPS: usize> Locked<'_, B, SNIPS> {
    fn is_live(&self, snip: Snip) -> bool {
        self.slots.get(snip.index()).is_some_and(|slot| {
            slot.generation.load(Ordering::Acquire) == snip.generation && slot.users.get() > 0
        })
    }

    fn users(&self, snip: Snip) -> u32 {
        self.slots.get(snip.index()).map_or(0, |slot| slot.users.get())
    }

    fn record(&self, snip: Snip) -> Result<&SnipRecord<B::Ptr>> {
        if !self.is_live(snip) {
            return Err(PktBufError::StaleSnip);
        }
        self.state
            .records
            .get(snip.index())
            .and_then(Option::as_ref)
            .ok_or(PktBufError::StaleSnip)
    }

    fn record_mut(&mut self, snip: Snip) -> Result<&mut SnipRecord<B::Ptr>> {
        if !self.is_live(snip) {
            return Err(PktBufError::StaleSnip);
        }
        self.state
            .records
            .get_mut(snip.index())
            .and_then(Option::as_mut)
            .ok_or(PktBufError::StaleSnip)
    }

    /// The record of `snip` for modification, if `snip` has a single user.
    fn exclusive(&mut self, snip: Snip) -> Result<&mut SnipRecord<B::Ptr>> {
        let users = self.users(snip);
        let record = self.record_mut(snip)?;
        if users > 1 {
            return Err(PktBufError::Shared);
        }
        Ok(record)
    }

    /// Index of a free record.
    fn vacant(&self) -> Result<u32> {
        self.state
            .records
            .iter()
            .position(Option::is_none)
            .and_then(|index| u32::try_from(index).ok())
            .ok_or_else(|| {
                debug!("pktbuf: snippet record pool exhausted");
                PktBufError::OutOfRecords
            })
    }

    /// Fill the free record `index` and hand out a handle with one user.
    fn create(&mut self, index: u32, record: SnipRecord<B::Ptr>) -> Snip {
        let slot = &self.slots[index as usize];
        self.state.records[index as usize] = Some(record);
        slot.users.reset(1);
        Snip {
            index,
            generation: slot.generation.load(Ordering::Acquire),
        }
    }

    /// Free the record of `snip` and its arena data, and retire the handle.
    fn destroy(&mut self, snip: Snip) {
        let index = snip.index();
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        if slot.generation.load(Ordering::Acquire) != snip.generation {
            trace!("pktbuf: snip {index} already retired");
            return;
        }
        let Some(record) = self.state.records.get_mut(index).and_then(Option::take) else {
            return;
        };
        if let SnipData::Arena(ptr) = record.data
            && self.state.backend.contains(ptr)
        {
            self.state.backend.free(ptr);
        }
        slot.users.reset(0);
        slot.generation.fetch_add(1, Ordering::Release);
        trace!("pktbuf: destroyed snip {index} ({} bytes)", record.size);
    }

    fn destroy_chain(&mut self, head: Option<Snip>) {
        let mut cursor = head;
        while let Some(node) = cursor {
            chain::advance(&*self, &mut cursor);
            self.destroy(node);
        }
    }

    /// Allocate `size` arena bytes and a record pointing at them.
    fn alloc_snip(
        &mut self,
        size: PktSize,
        proto: ProtoType,
        next: Option<Snip>,
    ) -> Result<(Snip, B::Ptr)> {
        if size == 0 {
            return Err(PktBufError::ZeroSize);
        }
        let index = self.vacant()?;
        let ptr = self
            .state
            .backend
            .alloc(usize::from(size))
            .ok_or(PktBufError::OutOfMemory)?;
        let snip = self.create(
            index,
            SnipRecord {
                next,
                data: SnipData::Arena(ptr),
                size,
                proto,
            },
        );
        Ok((snip, ptr))
    }

    /// Copy `source` to the fresh data of `snip`; destroys `snip` on failure.
    fn fill(&mut self, snip: Snip, ptr: B::Ptr, source: &[u8]) -> Result<()> {
        match self.state.backend.bytes_mut(ptr, source.len()) {
            Some(bytes) => {
                bytes.copy_from_slice(source);
                Ok(())
            }
            None => {
                self.destroy(snip);
                Err(PktBufError::OutOfMemory)
            }
        }
    }

    fn fresh_header(
        &mut self,
        pkt: Option<Snip>,
        source: Option<&[u8]>,
        size: PktSize,
        proto: ProtoType,
    ) -> Result<Snip> {
        if let Some(pkt) = pkt {
            self.record(pkt)?;
        }
        let (header, ptr) = self.alloc_snip(size, proto, pkt)?;
        if let Some(source) = source {
            self.fill(header, ptr, source)?;
        }
        Ok(header)
    }

    fn carve_front(&mut self, pkt: Snip, size: PktSize, proto: ProtoType) -> Result<Snip> {
        let record = *self.exclusive(pkt)?;
        if size >= record.size {
            return Err(PktBufError::TooLarge(usize::from(size)));
        }
        let index = self.vacant()?;

        let split = usize::from(size);
        let (front, rest) = match record.data {
            SnipData::Arena(ptr) => {
                let rest = B::offset(ptr, split);
                if !self.state.backend.add_chunk(rest) {
                    debug!("pktbuf: cannot register sub-chunk {rest:?}");
                    return Err(PktBufError::OutOfMemory);
                }
                (SnipData::Arena(ptr), SnipData::Arena(rest))
            }
            SnipData::External(bytes) => {
                let (front, rest) = bytes.split_at(split);
                (SnipData::External(front), SnipData::External(rest))
            }
        };

        let trailing = self.record_mut(pkt)?;
        trailing.data = rest;
        trailing.size -= size;

        trace!("pktbuf: carved {size} byte header off snip {}", pkt.index());
        Ok(self.create(
            index,
            SnipRecord {
                next: Some(pkt),
                data: front,
                size,
                proto,
            },
        ))
    }

    /// Copy one snippet (data included) into a fresh, unlinked snippet.
    fn copy_one(&mut self, node: Snip) -> Result<Snip> {
        let record = *self.record(node)?;
        let (copy, ptr) = self.alloc_snip(record.size, record.proto, None)?;
        match record.data {
            SnipData::Arena(src) => {
                if !self.state.backend.copy(src, ptr, usize::from(record.size)) {
                    self.destroy(copy);
                    return Err(PktBufError::OutOfMemory);
                }
            }
            SnipData::External(bytes) => self.fill(copy, ptr, bytes)?,
        }
        Ok(copy)
    }

    /// Deep copy of the chain starting at `head`, in the same order.
    fn duplicate(&mut self, head: Snip) -> Result<Snip> {
        let mut first = None;
        let mut last: Option<Snip> = None;
        let mut cursor = Some(head);

        while let Some(node) = cursor {
            let copy = match self.copy_one(node) {
                Ok(copy) => copy,
                Err(err) => {
                    self.destroy_chain(first);
                    return Err(err);
                }
            };
            match last {
                Some(previous) => self.set_next(previous, Some(copy)),
                None => first = Some(copy),
            }
            last = Some(copy);
            chain::advance(&*self, &mut cursor);
        }

        first.ok_or(PktBufError::StaleSnip)
    }

    fn realloc_data(&mut self, snip: Snip, size: PktSize) -> Result<()> {
        let record = *self.record(snip)?;
        let SnipData::Arena(ptr) = record.data else {
            return Err(PktBufError::NotOwned);
        };
        if !self.state.backend.contains(ptr) {
            return Err(PktBufError::NotOwned);
        }
        if self.users(snip) > 1 {
            return Err(PktBufError::Shared);
        }
        if SnipChain::next(&*self, snip).is_some() {
            return Err(PktBufError::Chained);
        }

        let moved = self
            .state
            .backend
            .realloc(ptr, usize::from(record.size), usize::from(size))
            .ok_or(PktBufError::OutOfMemory)?;
        let record = self.record_mut(snip)?;
        record.data = SnipData::Arena(moved);
        record.size = size;
        Ok(())
    }
}

/// Chains over live records. A `next` link to a released snippet ends the chain.
impl<B: Backend, const SNIPS: usize> SnipChain for Locked<'_, B, SNIPS> {
    type Node = Snip;

    fn next(&self, node: Snip) -> Option<Snip> {
        let next = self.record(node).ok()?.next?;
        self.is_live(next).then_some(next)
    }

    fn set_next(&mut self, node: Snip, next: Option<Snip>) {
        if let Ok(record) = self.record_mut(node) {
            record.next = next;
        }
    }

    fn size(&self, node: Snip) -> PktSize {
        self.record(node).map_or(0, |record| record.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_arena::StaticArena;

    fn buf<const SNIPS: usize>() -> PktBuf<StaticArena<256>, SNIPS> {
        PktBuf::new(StaticArena::new())
    }

    #[test]
    fn released_handle_is_stale() {
        let buf = buf::<4>();
        let snip = buf.alloc(8).unwrap();
        buf.release(snip).unwrap();

        assert_eq!(buf.release(snip), Err(PktBufError::StaleSnip));
        assert_eq!(buf.hold(snip), Err(PktBufError::StaleSnip));
        assert_eq!(buf.size(snip), Err(PktBufError::StaleSnip));

        let reused = buf.alloc(8).unwrap();
        assert_eq!(reused.index(), snip.index());
        assert_ne!(reused, snip);
        assert_eq!(buf.users(snip), Err(PktBufError::StaleSnip));
        assert_eq!(buf.users(reused), Ok(1));
        buf.release(reused).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn record_pool_exhaustion_leaves_arena_untouched() {
        let buf = buf::<2>();
        let a = buf.alloc(8).unwrap();
        let b = buf.alloc(8).unwrap();
        let before = buf.stats();

        assert_eq!(buf.alloc(8), Err(PktBufError::OutOfRecords));
        assert_eq!(buf.stats(), before);

        buf.release(a).unwrap();
        buf.release(b).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn failed_copy_rolls_back_whole_duplicate() {
        let buf = buf::<3>();
        let payload = buf.alloc(16).unwrap();
        let header = buf
            .add_header(Some(payload), HeaderData::Empty, 8, ProtoType::Udp)
            .unwrap();
        buf.hold(header).unwrap();

        // One free record: the first copy fits, the second does not.
        assert_eq!(buf.start_write(header), Err(PktBufError::OutOfRecords));
        assert_eq!(buf.stats().snips, 2);
        assert_eq!(buf.users(header), Ok(2));

        buf.release(header).unwrap();
        buf.release(header).unwrap();
        buf.release(payload).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn reset_invalidates_all_handles() {
        let buf = buf::<4>();
        let a = buf.alloc(8).unwrap();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.size(a), Err(PktBufError::StaleSnip));
        assert_eq!(buf.stats(), PktBufStats::default());
    }

    #[test]
    fn chain_stops_at_released_successor() {
        let buf = buf::<4>();
        let payload = buf.alloc(8).unwrap();
        let header = buf
            .add_header(Some(payload), HeaderData::Empty, 4, ProtoType::Ipv6)
            .unwrap();
        assert_eq!(buf.count(Some(header)), 2);

        buf.release(payload).unwrap();
        assert_eq!(buf.next(header), Ok(None));
        assert_eq!(buf.length(Some(header)), 4);

        buf.release(header).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn hold_on_reused_record_returns_the_user() {
        let buf = buf::<1>();
        let old = buf.alloc(8).unwrap();
        let slot = buf.slot(old).unwrap();

        // The record changes hands between the generation check and the increment.
        buf.release(old).unwrap();
        let new = buf.alloc(8).unwrap();
        assert_eq!(new.index(), old.index());

        assert_eq!(buf.hold_slot(slot, old), Err(PktBufError::StaleSnip));
        assert_eq!(buf.users(new), Ok(1));

        buf.release(new).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn destroy_ignores_retired_handle() {
        let buf = buf::<1>();
        let old = buf.alloc(8).unwrap();
        buf.reset();
        let new = buf.alloc(8).unwrap();
        assert_eq!(new.index(), old.index());

        buf.with_locked(|locked| locked.destroy(old));
        assert_eq!(buf.users(new), Ok(1));
        assert_eq!(buf.size(new), Ok(8));
        assert_eq!(buf.stats().snips, 1);

        buf.release(new).unwrap();
        assert!(buf.is_empty());
    }
}
