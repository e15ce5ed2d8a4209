use {
    crate::{
        handle::{ReadHandle, WriteHandle},
        meta::MetaLock,
        raw::{RawLock, RwLock},
        tracker::Tracker,
    },
    static_assertions::{assert_impl_all, assert_not_impl_any},
    std::{
        cell::UnsafeCell,
        fmt::{Debug, Formatter},
    },
};

#[cfg(test)]
mod tests;

/// A value paired with the lock that protects it.
///
/// The value is only reachable through access handles, which acquire the lock
/// on creation and release it when the last copy is dropped. The second type
/// parameter selects the lock primitive; it defaults to [`RwLock`].
///
/// All acquisition operations come in three flavors: plain, `_auth` (with a
/// [`Tracker`] for deadlock prevention) and `_multi` (with a tracker and a
/// [`MetaLock`] for multi-locking), each with a blocking and a `try_`
/// non-blocking variant. Denial is never an error, just `None`; the caller
/// decides whether to retry, skip or give up.
///
/// # Example
///
/// ```
/// use std::thread;
/// use lockcell::LockCell;
///
/// let cell: LockCell<Vec<i32>> = LockCell::new(vec![]);
///
/// thread::scope(|scope| {
///     scope.spawn(|| {
///         let mut write = cell.write().unwrap();
///         write.value_mut().push(1);
///     });
/// });
///
/// let read = cell.read().unwrap();
/// assert_eq!(*read, [1]);
/// ```
pub struct LockCell<T, L = RwLock>
where
    T: ?Sized,
{
    lock: L,
    value: UnsafeCell<T>,
}

assert_impl_all!(LockCell<i32>: Send, Sync);
assert_not_impl_any!(LockCell<std::cell::Cell<i32>>: Sync);

// SAFETY: - The lock primitive only hands the value out to one writer, or to
//           readers plus at most the writer-then-reader holder, and the
//           ValueMut gate keeps the latter's accesses disjoint.
//         - Concurrent readers on several threads observe &T, which requires
//           T: Sync.
//         - A writer may mutate the value from a thread that does not own the
//           cell, which requires T: Send.
unsafe impl<T, L> Sync for LockCell<T, L>
where
    T: ?Sized + Send + Sync,
    L: RawLock,
{
}

impl<T, L> LockCell<T, L>
where
    L: RawLock + Default,
{
    /// Creates a cell protected by a default-constructed lock.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{LockCell, WriteLock};
    ///
    /// let cell: LockCell<i32, WriteLock> = LockCell::new(3);
    /// assert_eq!(*cell.read().unwrap(), 3);
    /// ```
    pub fn new(value: T) -> Self {
        Self::with_lock(value, L::default())
    }
}

impl<T, L> LockCell<T, L>
where
    L: RawLock,
{
    /// Creates a cell protected by `lock`.
    ///
    /// This is how cells with [`Ordered`](crate::Ordered) locks are built.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{LockCell, Ordered};
    ///
    /// let cell = LockCell::with_lock('a', Ordered::<lockcell::RwLock>::new(4));
    /// assert_eq!(cell.order(), 4);
    /// ```
    pub fn with_lock(value: T, lock: L) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
        }
    }

    /// Unwraps the value, consuming the cell.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Creates a tracker whose policy matches this cell's lock primitive, so
    /// that the two are compatible by construction.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{LockCell, Ordered, RwLock};
    ///
    /// let tracker = LockCell::<i32, Ordered<RwLock>>::new_tracker();
    /// assert_eq!(tracker.is_ordered(), true);
    /// ```
    pub fn new_tracker() -> Tracker {
        L::matching_tracker()
    }
}

impl<T, L> LockCell<T, L>
where
    T: ?Sized,
    L: RawLock,
{
    /// The order of this cell's lock. 0 when the lock is unordered.
    #[inline]
    pub fn order(&self) -> u64 {
        self.lock.order()
    }

    /// Returns a mutable reference to the value.
    ///
    /// No locking happens: the exclusive borrow proves no handle exists.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Acquires a read handle, blocking while the lock is held for writing.
    ///
    /// Returns `None` if the lock denies the request outright (for example on
    /// a [`BrokenLock`](crate::BrokenLock) cell, or on an ordered cell with no
    /// tracker).
    pub fn read(&self) -> Option<ReadHandle<'_, T>> {
        ReadHandle::acquire(&self.value, &self.lock, true, None, None)
    }

    /// Acquires a read handle without blocking.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::LockCell;
    ///
    /// let cell: LockCell<i32> = LockCell::new(0);
    /// let write = cell.write().unwrap();
    /// assert!(cell.try_read().is_none());
    /// drop(write);
    /// assert!(cell.try_read().is_some());
    /// ```
    pub fn try_read(&self) -> Option<ReadHandle<'_, T>> {
        ReadHandle::acquire(&self.value, &self.lock, false, None, None)
    }

    /// Acquires a read handle under `tracker`, blocking only when the tracker
    /// rules out a deadlock.
    ///
    /// The tracker can deny the request even when the lock is free; denial is
    /// immediate and surfaces as `None`.
    pub fn read_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<ReadHandle<'a, T>> {
        ReadHandle::acquire(&self.value, &self.lock, true, Some(tracker), None)
    }

    /// Acquires a read handle under `tracker` without blocking.
    pub fn try_read_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<ReadHandle<'a, T>> {
        ReadHandle::acquire(&self.value, &self.lock, false, Some(tracker), None)
    }

    /// Acquires a read handle under `tracker`, registering the acquisition
    /// with `meta` so that it participates in multi-locking.
    ///
    /// The meta-lock's read side is probed first; while another thread holds
    /// the meta-lock's write side this blocks (and the `try_` variant fails).
    pub fn read_multi<'a>(
        &'a self,
        meta: &'a MetaLock,
        tracker: &'a Tracker,
    ) -> Option<ReadHandle<'a, T>> {
        ReadHandle::acquire(&self.value, &self.lock, true, Some(tracker), Some(meta))
    }

    /// Acquires a read handle under `tracker` and `meta` without blocking.
    pub fn try_read_multi<'a>(
        &'a self,
        meta: &'a MetaLock,
        tracker: &'a Tracker,
    ) -> Option<ReadHandle<'a, T>> {
        ReadHandle::acquire(&self.value, &self.lock, false, Some(tracker), Some(meta))
    }

    /// Acquires a write handle, blocking while the lock is held.
    ///
    /// A waiting writer locks out new readers, so writers cannot be starved.
    pub fn write(&self) -> Option<WriteHandle<'_, T>> {
        WriteHandle::acquire(&self.value, &self.lock, true, None, None)
    }

    /// Acquires a write handle without blocking.
    pub fn try_write(&self) -> Option<WriteHandle<'_, T>> {
        WriteHandle::acquire(&self.value, &self.lock, false, None, None)
    }

    /// Acquires a write handle under `tracker`, blocking only when the
    /// tracker rules out a deadlock.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{LockCell, Policy, Tracker};
    ///
    /// let cell: LockCell<i32> = LockCell::new(0);
    /// let tracker = Tracker::new(Policy::ReadWrite);
    ///
    /// let write = cell.write_auth(&tracker).unwrap();
    /// // The writer may also read the same cell through the same tracker.
    /// let read = cell.read_auth(&tracker).unwrap();
    /// assert_eq!(write, read);
    /// ```
    pub fn write_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<WriteHandle<'a, T>> {
        WriteHandle::acquire(&self.value, &self.lock, true, Some(tracker), None)
    }

    /// Acquires a write handle under `tracker` without blocking.
    pub fn try_write_auth<'a>(&'a self, tracker: &'a Tracker) -> Option<WriteHandle<'a, T>> {
        WriteHandle::acquire(&self.value, &self.lock, false, Some(tracker), None)
    }

    /// Acquires a write handle under `tracker` and `meta`.
    ///
    /// See [`read_multi`](LockCell::read_multi).
    pub fn write_multi<'a>(
        &'a self,
        meta: &'a MetaLock,
        tracker: &'a Tracker,
    ) -> Option<WriteHandle<'a, T>> {
        WriteHandle::acquire(&self.value, &self.lock, true, Some(tracker), Some(meta))
    }

    /// Acquires a write handle under `tracker` and `meta` without blocking.
    pub fn try_write_multi<'a>(
        &'a self,
        meta: &'a MetaLock,
        tracker: &'a Tracker,
    ) -> Option<WriteHandle<'a, T>> {
        WriteHandle::acquire(&self.value, &self.lock, false, Some(tracker), Some(meta))
    }
}

impl<T, L> Debug for LockCell<T, L>
where
    T: ?Sized + Debug,
    L: RawLock,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("LockCell");
        s.field("order", &self.order());
        match self.try_read() {
            Some(read) => s.field("value", &&*read),
            None => s.field("value", &format_args!("<locked>")),
        };
        s.finish_non_exhaustive()
    }
}

/// Copies `src`'s value into `dst`, taking `dst`'s write lock and `src`'s
/// read lock.
///
/// No deadlock prevention is involved; both acquisitions use `block`. Returns
/// whether the copy happened, which depends only on locking success.
///
/// # Example
///
/// ```
/// use lockcell::{try_copy, LockCell};
///
/// let src: LockCell<i32> = LockCell::new(9);
/// let dst: LockCell<i32> = LockCell::new(0);
/// assert_eq!(try_copy(&dst, &src, true), true);
/// assert_eq!(*dst.read().unwrap(), 9);
/// ```
pub fn try_copy<T, U, LT, LU>(dst: &LockCell<T, LT>, src: &LockCell<U, LU>, block: bool) -> bool
where
    T: From<U>,
    U: Clone,
    LT: RawLock,
    LU: RawLock,
{
    let Some(mut write) = (if block { dst.write() } else { dst.try_write() }) else {
        return false;
    };
    let Some(read) = (if block { src.read() } else { src.try_read() }) else {
        return false;
    };
    *write.value_mut() = T::from((*read).clone());
    true
}

/// Copies `src`'s value into `dst` under `tracker`.
///
/// The two locks are taken lower order first, so the copy composes with the
/// ordering protocol; with unordered cells the write lock is taken first.
/// Returns whether the copy happened.
pub fn try_copy_auth<T, U, LT, LU>(
    dst: &LockCell<T, LT>,
    src: &LockCell<U, LU>,
    tracker: &Tracker,
    block: bool,
) -> bool
where
    T: From<U>,
    U: Clone,
    LT: RawLock,
    LU: RawLock,
{
    let write;
    let read;
    if dst.order() < src.order() {
        write = if block {
            dst.write_auth(tracker)
        } else {
            dst.try_write_auth(tracker)
        };
        read = if block {
            src.read_auth(tracker)
        } else {
            src.try_read_auth(tracker)
        };
    } else {
        read = if block {
            src.read_auth(tracker)
        } else {
            src.try_read_auth(tracker)
        };
        write = if block {
            dst.write_auth(tracker)
        } else {
            dst.try_write_auth(tracker)
        };
    }
    let (Some(mut write), Some(read)) = (write, read) else {
        return false;
    };
    *write.value_mut() = T::from((*read).clone());
    true
}

/// Copies `src`'s value into `dst` while holding the meta-lock's write side.
///
/// With `try_multi` the meta-lock is frozen for the duration of the two
/// acquisitions and released before the copy itself. Without `try_multi` the
/// caller must already hold the meta-lock's write side under the same
/// tracker, or both acquisitions will block on the frozen meta-lock.
///
/// Returns whether the copy happened.
pub fn try_copy_multi<T, U, LT, LU>(
    dst: &LockCell<T, LT>,
    src: &LockCell<U, LU>,
    meta: &MetaLock,
    tracker: &Tracker,
    block: bool,
    try_multi: bool,
) -> bool
where
    T: From<U>,
    U: Clone,
    LT: RawLock,
    LU: RawLock,
{
    let mut freeze = None;
    if try_multi {
        freeze = if block {
            meta.write_auth(tracker)
        } else {
            meta.try_write_auth(tracker)
        };
        if freeze.is_none() {
            return false;
        }
    }

    let write;
    let read;
    if dst.order() < src.order() {
        write = if block {
            dst.write_multi(meta, tracker)
        } else {
            dst.try_write_multi(meta, tracker)
        };
        read = if block {
            src.read_multi(meta, tracker)
        } else {
            src.try_read_multi(meta, tracker)
        };
    } else {
        read = if block {
            src.read_multi(meta, tracker)
        } else {
            src.try_read_multi(meta, tracker)
        };
        write = if block {
            dst.write_multi(meta, tracker)
        } else {
            dst.try_write_multi(meta, tracker)
        };
    }

    // Unfreeze as soon as both cells are held.
    drop(freeze);

    let (Some(mut write), Some(read)) = (write, read) else {
        return false;
    };
    *write.value_mut() = T::from((*read).clone());
    true
}
