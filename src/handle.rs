use {
    crate::{meta::MetaLock, raw::RawLock, tracker::Tracker},
    static_assertions::assert_not_impl_any,
    std::{
        cell::UnsafeCell,
        fmt::{Debug, Formatter},
        ops::{Deref, DerefMut},
        ptr,
        rc::Rc,
    },
};

#[cfg(test)]
mod tests;

/// One successful lock acquisition, together with everything needed to undo
/// it. The last handle sharing it releases on drop.
pub(crate) struct Acquired<'a> {
    lock: &'a (dyn RawLock + 'a),
    meta: Option<&'a MetaLock>,
    tracker: Option<&'a Tracker>,
    read: bool,
}

impl<'a> Acquired<'a> {
    fn obtain(
        lock: &'a (dyn RawLock + 'a),
        read: bool,
        block: bool,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<Self> {
        if let Some(meta) = meta {
            // The meta-lock read side is probed: it is not recorded in the
            // tracker and only contends while a freezer holds the write side.
            meta.raw().acquire(tracker, true, block, true)?;
        }
        if lock.acquire(tracker, read, block, false).is_none() {
            if let Some(meta) = meta {
                meta.raw().release(tracker, true, true);
            }
            return None;
        }
        Some(Self {
            lock,
            meta,
            tracker,
            read,
        })
    }
}

impl Drop for Acquired<'_> {
    fn drop(&mut self) {
        // The cell lock first, then the meta-lock read side. Releasing the
        // cell lock also reports the release to the tracker.
        self.lock.release(self.tracker, self.read, false);
        if let Some(meta) = self.meta {
            meta.raw().release(self.tracker, true, true);
        }
    }
}

/// A read handle on a [`LockCell`](crate::LockCell).
///
/// The handle holds a read acquisition on the cell's lock from creation until
/// the last clone is dropped; clones share one acquisition. It dereferences
/// to the protected value.
///
/// Handles compare equal when they refer to the same protected value.
///
/// # Example
///
/// ```
/// use lockcell::LockCell;
///
/// let cell: LockCell<i32> = LockCell::new(10);
/// let first = cell.read().unwrap();
/// let second = first.clone();
/// assert_eq!(*first + *second, 20);
/// ```
pub struct ReadHandle<'a, T>
where
    T: ?Sized,
{
    value: &'a UnsafeCell<T>,
    acquired: Rc<Acquired<'a>>,
}

assert_not_impl_any!(ReadHandle<'static, ()>: Send, Sync);

impl<'a, T> ReadHandle<'a, T>
where
    T: ?Sized,
{
    pub(crate) fn acquire(
        value: &'a UnsafeCell<T>,
        lock: &'a (dyn RawLock + 'a),
        block: bool,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<Self> {
        let acquired = Acquired::obtain(lock, true, block, tracker, meta)?;
        Some(Self {
            value,
            acquired: Rc::new(acquired),
        })
    }
}

impl<T> Clone for ReadHandle<'_, T>
where
    T: ?Sized,
{
    /// Clones the handle. The clone shares the acquisition; the lock is
    /// released when the last clone is dropped.
    fn clone(&self) -> Self {
        Self {
            value: self.value,
            acquired: self.acquired.clone(),
        }
    }
}

impl<T> Deref for ReadHandle<'_, T>
where
    T: ?Sized,
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: - The acquisition keeps a read lock on the cell for as long
        //           as this handle exists, so no other thread holds a write
        //           lock.
        //         - The one writer that can coexist with readers is the
        //           writer-then-reader holder on this thread, and its mutable
        //           access goes through ValueMut, which the primitive refuses
        //           to grant while the read lock is held.
        unsafe { &*self.value.get() }
    }
}

impl<T> PartialEq for ReadHandle<'_, T>
where
    T: ?Sized,
{
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.value.get(), other.value.get())
    }
}

impl<T> PartialEq<WriteHandle<'_, T>> for ReadHandle<'_, T>
where
    T: ?Sized,
{
    #[inline]
    fn eq(&self, other: &WriteHandle<'_, T>) -> bool {
        ptr::eq(self.value.get(), other.value.get())
    }
}

impl<T> Eq for ReadHandle<'_, T> where T: ?Sized {}

impl<T> Debug for ReadHandle<'_, T>
where
    T: ?Sized + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadHandle").field(&&**self).finish()
    }
}

/// A write handle on a [`LockCell`](crate::LockCell).
///
/// The handle holds a write acquisition on the cell's lock from creation
/// until it is dropped. It dereferences to the protected value; mutable
/// access goes through [`value_mut`](WriteHandle::value_mut).
///
/// Write handles are exclusive: they cannot be cloned, since two owners of
/// mutable access to one value cannot coexist.
///
/// # Example
///
/// ```
/// use lockcell::LockCell;
///
/// let cell: LockCell<i32> = LockCell::new(10);
/// let mut write = cell.write().unwrap();
/// *write.value_mut() += 1;
/// assert_eq!(*write, 11);
/// ```
pub struct WriteHandle<'a, T>
where
    T: ?Sized,
{
    value: &'a UnsafeCell<T>,
    acquired: Acquired<'a>,
}

assert_not_impl_any!(WriteHandle<'static, ()>: Send, Sync);

impl<'a, T> WriteHandle<'a, T>
where
    T: ?Sized,
{
    pub(crate) fn acquire(
        value: &'a UnsafeCell<T>,
        lock: &'a (dyn RawLock + 'a),
        block: bool,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<Self> {
        let acquired = Acquired::obtain(lock, false, block, tracker, meta)?;
        Some(Self { value, acquired })
    }

    /// Mutably borrows the protected value.
    ///
    /// While the returned borrow is live, read requests on the same cell by
    /// the same tracker are denied instead of taking the writer-then-reader
    /// exception.
    ///
    /// # Panics
    ///
    /// Panics if this thread also holds read handles on the cell through the
    /// writer-then-reader exception.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::LockCell;
    ///
    /// let cell: LockCell<Vec<i32>> = LockCell::new(vec![1]);
    /// let mut write = cell.write().unwrap();
    /// write.value_mut().push(2);
    /// assert_eq!(write.len(), 2);
    /// ```
    pub fn value_mut(&mut self) -> ValueMut<'_, T> {
        assert!(
            self.acquired.lock.acquire_value_mut(),
            "cell is also locked for reading",
        );
        ValueMut {
            value: self.value,
            lock: self.acquired.lock,
        }
    }
}

impl<T> Deref for WriteHandle<'_, T>
where
    T: ?Sized,
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: - The acquisition keeps the write lock on the cell, so no
        //           other thread can access the value.
        //         - On this thread, mutable access exists only while a
        //           ValueMut is live, and a ValueMut borrows this handle
        //           mutably.
        unsafe { &*self.value.get() }
    }
}

impl<T> PartialEq for WriteHandle<'_, T>
where
    T: ?Sized,
{
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.value.get(), other.value.get())
    }
}

impl<T> PartialEq<ReadHandle<'_, T>> for WriteHandle<'_, T>
where
    T: ?Sized,
{
    #[inline]
    fn eq(&self, other: &ReadHandle<'_, T>) -> bool {
        ptr::eq(self.value.get(), other.value.get())
    }
}

impl<T> Eq for WriteHandle<'_, T> where T: ?Sized {}

impl<T> Debug for WriteHandle<'_, T>
where
    T: ?Sized + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WriteHandle").field(&&**self).finish()
    }
}

/// A scoped mutable borrow of a protected value.
///
/// Created by [`WriteHandle::value_mut`]. While it exists, the cell denies
/// same-tracker read requests, so no shared reference to the value can be
/// produced.
pub struct ValueMut<'h, T>
where
    T: ?Sized,
{
    value: &'h UnsafeCell<T>,
    lock: &'h (dyn RawLock + 'h),
}

assert_not_impl_any!(ValueMut<'static, ()>: Send, Sync);

impl<T> Deref for ValueMut<'_, T>
where
    T: ?Sized,
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: - See deref_mut.
        unsafe { &*self.value.get() }
    }
}

impl<T> DerefMut for ValueMut<'_, T>
where
    T: ?Sized,
{
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: - The write lock excludes every other thread.
        //         - acquire_value_mut verified that no read handle is live on
        //           the cell and the primitive denies new same-tracker reads
        //           until this borrow is dropped, so this thread holds no
        //           shared reference to the value either.
        //         - This borrow holds the write handle's mutable borrow, so
        //           the handle cannot produce references concurrently.
        unsafe { &mut *self.value.get() }
    }
}

impl<T> Drop for ValueMut<'_, T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        self.lock.release_value_mut();
    }
}

impl<T> Debug for ValueMut<'_, T>
where
    T: ?Sized + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ValueMut").field(&&**self).finish()
    }
}
