use {
    crate::{
        raw::{RawLock, RwLock},
        tracker::Tracker,
    },
    static_assertions::assert_not_impl_any,
    std::fmt::{Debug, Formatter},
};

#[cfg(test)]
mod tests;

/// The shared latch behind multi-locking.
///
/// A `MetaLock` is a payload-less [`RwLock`] primitive shared by every cell
/// that takes part in multi-locking. It is used two ways:
///
/// - **Passively**, by passing it to the `_multi` operations of
///   [`LockCell`](crate::LockCell): each such acquisition silently probes the
///   meta-lock's read side first. This is cheap, since the read side only
///   contends while somebody holds the write side.
/// - **Actively**, through [`write_auth`](MetaLock::write_auth): holding the
///   write side blocks every new passive acquisition and waits for existing
///   ones to drain. The holder may then lock any number of participating
///   cells without risking a deadlock against other participating threads.
///
/// The active thread keeps passing the meta-lock to its own `_multi` calls;
/// their probes succeed because the writer of an [`RwLock`] may re-acquire
/// the read side through the same tracker.
///
/// # Example
///
/// ```
/// use lockcell::{LockCell, MetaLock, Policy, Tracker};
///
/// let meta = MetaLock::new();
/// let first: LockCell<i32> = LockCell::new(1);
/// let second: LockCell<i32> = LockCell::new(2);
/// let tracker = Tracker::new(Policy::ReadWrite);
///
/// // Freeze the world, then lock both cells for writing at once.
/// let freeze = meta.write_auth(&tracker).unwrap();
/// let mut a = first.write_multi(&meta, &tracker).unwrap();
/// let mut b = second.write_multi(&meta, &tracker).unwrap();
/// drop(freeze);
///
/// let sum = *a + *b;
/// *a.value_mut() = sum;
/// *b.value_mut() = sum;
/// ```
pub struct MetaLock {
    lock: RwLock,
}

impl MetaLock {
    pub const fn new() -> Self {
        Self {
            lock: RwLock::new(),
        }
    }

    /// The underlying primitive, for the handle layer's passive probes.
    #[inline]
    pub(crate) fn raw(&self) -> &RwLock {
        &self.lock
    }

    /// Acquires the write side, blocking until all passive users have
    /// drained.
    ///
    /// The acquisition is recorded in `tracker`, so its policy applies: a
    /// read-write tracker that already holds locks is denied, which is
    /// exactly the discipline that makes the freeze safe to wait for.
    pub fn write_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<MetaWriteGuard<'a>> {
        self.lock.acquire(Some(tracker), false, true, false)?;
        Some(MetaWriteGuard {
            lock: &self.lock,
            tracker,
        })
    }

    /// Acquires the write side without blocking.
    pub fn try_write_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<MetaWriteGuard<'a>> {
        self.lock.acquire(Some(tracker), false, false, false)?;
        Some(MetaWriteGuard {
            lock: &self.lock,
            tracker,
        })
    }

    /// Acquires the read side as a first-class guard, blocking out any
    /// would-be freezer for as long as the guard lives.
    ///
    /// Unlike the passive probes, this is recorded in `tracker`.
    pub fn read_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<MetaReadGuard<'a>> {
        self.lock.acquire(Some(tracker), true, true, false)?;
        Some(MetaReadGuard {
            lock: &self.lock,
            tracker,
        })
    }

    /// Acquires the read side without blocking.
    pub fn try_read_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<MetaReadGuard<'a>> {
        self.lock.acquire(Some(tracker), true, false, false)?;
        Some(MetaReadGuard {
            lock: &self.lock,
            tracker,
        })
    }
}

impl Default for MetaLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MetaLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let addr: *const MetaLock = self;
        f.debug_struct("MetaLock")
            .field("id", &addr)
            .finish_non_exhaustive()
    }
}

/// Holds the meta-lock's write side; see [`MetaLock::write_auth`].
///
/// While this guard exists, no other thread can complete a passive
/// acquisition through the same meta-lock.
pub struct MetaWriteGuard<'a> {
    lock: &'a RwLock,
    tracker: &'a Tracker,
}

assert_not_impl_any!(MetaWriteGuard<'_>: Send, Sync);

impl Drop for MetaWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(Some(self.tracker), false, false);
    }
}

impl Debug for MetaWriteGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaWriteGuard").finish_non_exhaustive()
    }
}

/// Holds the meta-lock's read side; see [`MetaLock::read_auth`].
///
/// While this guard exists, no thread can freeze the meta-lock.
pub struct MetaReadGuard<'a> {
    lock: &'a RwLock,
    tracker: &'a Tracker,
}

assert_not_impl_any!(MetaReadGuard<'_>: Send, Sync);

impl Drop for MetaReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(Some(self.tracker), true, false);
    }
}

impl Debug for MetaReadGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaReadGuard").finish_non_exhaustive()
    }
}
