use core::sync::atomic::{AtomicU32, Ordering};

/// Atomic shared-ownership counter.
///
/// Every update is a single read-modify-write that returns the resulting
/// value, so exactly one caller observes the transition to zero. The counter
/// never wraps: incrementing a dead (zero) or saturated counter fails, and so
/// does decrementing a dead one.
#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicU32,
}

impl RefCount {
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    /// Current value. Only a snapshot when other holders exist.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Add one holder to a live counter and return the new count.
    ///
    /// Returns `None` if the counter is zero (the object is already being
    /// destroyed) or at `u32::MAX`.
    #[inline]
    pub fn try_increment(&self) -> Option<u32> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 { None } else { n.checked_add(1) }
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Drop one holder and return the remaining count.
    ///
    /// Returns `None` if the counter already was zero. A return value of
    /// `Some(0)` means the caller was the last holder and owns the teardown.
    #[inline]
    pub fn decrement(&self) -> Option<u32> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }

    /// Overwrite the counter.
    ///
    /// Only valid while no other holder can observe the counter, e.g. when a
    /// recycled slot is handed out again under the owner's lock.
    #[inline]
    pub fn reset(&self, count: u32) {
        self.count.store(count, Ordering::Release);
    }
}
