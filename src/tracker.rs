use {
    static_assertions::assert_not_impl_any,
    std::{
        cell::{Cell, RefCell},
        collections::BTreeSet,
        fmt::{Debug, Formatter},
        marker::PhantomData,
    },
};


/// The rule table a [`Tracker`] applies to new lock requests.
///
/// Each variant corresponds to one lock primitive; a tracker built with the
/// matching policy admits exactly the combinations of held locks that cannot
/// deadlock on cells of that primitive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Many read locks, or one write lock, but not both. The one exception is
    /// a read lock on a cell whose current writer is this tracker.
    ReadWrite,
    /// Many read locks, no write locks ever.
    ReadOnly,
    /// One lock at a time, with every request treated as a write. A second
    /// lock is still admitted while the requested cell is idle.
    WriteOnly,
    /// One lock at a time, no matter what state the requested cell is in.
    Dumb,
    /// No locks at all. Useful for testing pathological callers.
    Broken,
}

/// A single lock request as the primitives present it to a tracker.
pub(crate) struct Request {
    pub(crate) read: bool,
    pub(crate) block: bool,
    pub(crate) lock_out: bool,
    pub(crate) in_use: bool,
    pub(crate) order: u64,
}

/// Per-thread lock authorization.
///
/// A `Tracker` counts the locks its thread currently holds and rejects any new
/// acquisition that could participate in a deadlock. Create one tracker per
/// thread and pass it to every acquisition on [`LockCell`](crate::LockCell);
/// the cells report back to it on acquire and release.
///
/// A tracker never blocks. It only answers allow/deny; all waiting happens in
/// the lock primitive after the tracker has granted permission.
///
/// Trackers are thread-bound: they cannot be sent to or shared with another
/// thread.
///
/// # Example
///
/// ```
/// use lockcell::{LockCell, Policy, Tracker};
///
/// let cell: LockCell<i32> = LockCell::new(1);
/// let tracker = Tracker::new(Policy::ReadWrite);
///
/// let read = cell.read_auth(&tracker).unwrap();
/// assert_eq!(tracker.reading_count(), 1);
/// drop(read);
/// assert_eq!(tracker.reading_count(), 0);
/// ```
pub struct Tracker {
    policy: Policy,
    ordered: bool,
    reading: Cell<u64>,
    writing: Cell<u64>,
    ordered_held: RefCell<BTreeSet<u64>>,
    unordered_held: Cell<u64>,
    _not_send: PhantomData<*mut ()>,
}

assert_not_impl_any!(Tracker: Send, Sync);

impl Tracker {
    /// Creates a tracker that applies `policy` to every request.
    ///
    /// A tracker built this way never authorizes a lock that carries an
    /// order; use [`Tracker::ordered`] for cells behind
    /// [`Ordered`](crate::Ordered) locks.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{Policy, Tracker};
    ///
    /// let tracker = Tracker::new(Policy::Broken);
    /// assert_eq!(tracker.guess_read_allowed(false, false, 0), false);
    /// ```
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            ordered: false,
            reading: Cell::new(0),
            writing: Cell::new(0),
            ordered_held: RefCell::new(BTreeSet::new()),
            unordered_held: Cell::new(0),
            _not_send: PhantomData,
        }
    }

    /// Creates a tracker that applies `policy` and additionally keeps track of
    /// lock orders.
    ///
    /// On ordered locks the tracker enforces a strict acquisition order: it
    /// denies waiting for any lock whose order does not exceed the highest
    /// order it already holds. When the requested cell is idle the strict
    /// order is not enforced, and while the tracker holds any unordered lock
    /// it falls back to the plain `policy` rules.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{LockCell, Ordered, Policy, RwLock, Tracker};
    ///
    /// let first = LockCell::with_lock(1, Ordered::<RwLock>::new(1));
    /// let second = LockCell::with_lock(2, Ordered::<RwLock>::new(2));
    /// let tracker = Tracker::ordered(Policy::ReadWrite);
    ///
    /// let _low = first.read_auth(&tracker).unwrap();
    /// let _high = second.read_auth(&tracker).unwrap();
    /// ```
    pub fn ordered(policy: Policy) -> Self {
        let mut tracker = Self::new(policy);
        tracker.ordered = true;
        tracker
    }

    /// Returns the policy this tracker was built with.
    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Returns whether this tracker keeps track of lock orders.
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Returns the number of read locks currently held under this tracker.
    #[inline]
    pub fn reading_count(&self) -> u64 {
        self.reading.get()
    }

    /// Returns the number of write locks currently held under this tracker.
    ///
    /// Write-only and dumb trackers count every lock here, including locks
    /// that were requested as reads.
    #[inline]
    pub fn writing_count(&self) -> u64 {
        self.writing.get()
    }

    /// Predicts whether a read request would be authorized, without recording
    /// anything.
    ///
    /// `lock_out` and `in_use` describe the cell the caller intends to lock:
    /// whether another thread is queued in a way that would delay the request
    /// and whether the cell currently has any lock. Passing `true` for both
    /// gives the most pessimistic answer.
    ///
    /// # Example
    ///
    /// ```
    /// use lockcell::{Policy, Tracker};
    ///
    /// let tracker = Tracker::new(Policy::ReadOnly);
    /// assert_eq!(tracker.guess_read_allowed(true, true, 0), true);
    /// assert_eq!(tracker.guess_write_allowed(false, false, 0), false);
    /// ```
    pub fn guess_read_allowed(&self, lock_out: bool, in_use: bool, order: u64) -> bool {
        self.test(&Request {
            read: true,
            block: true,
            lock_out,
            in_use,
            order,
        })
    }

    /// Predicts whether a write request would be authorized, without
    /// recording anything.
    pub fn guess_write_allowed(&self, lock_out: bool, in_use: bool, order: u64) -> bool {
        self.test(&Request {
            read: false,
            block: true,
            lock_out,
            in_use,
            order,
        })
    }

    /// The identity the primitives use to recognize the current writer.
    ///
    /// Stable while any lock is held under this tracker, because held locks
    /// borrow the tracker.
    #[inline]
    pub(crate) fn id(&self) -> usize {
        let addr: *const Tracker = self;
        addr as usize
    }

    /// Evaluates `req` without recording it.
    pub(crate) fn test(&self, req: &Request) -> bool {
        if req.order > 0 && !self.ordered {
            return false;
        }
        // A non-blocking write cannot wait, so the held-lock conflicts that
        // lock_out and in_use guard against cannot deadlock.
        let waived = !req.block && !req.read;
        let lock_out = req.lock_out && !waived;
        let in_use = req.in_use && !waived;
        if self.ordered && req.order > 0 {
            let held = self.ordered_held.borrow();
            if req.in_use && held.last().is_some_and(|&max| max >= req.order) {
                return false;
            }
            if self.unordered_held.get() == 0 {
                // Strict ordering already rules out the waits those flags
                // guard against.
                return self.base_allows(req.read, false, false);
            }
        }
        self.base_allows(req.read, lock_out, in_use)
    }

    /// Evaluates `req` and, if allowed, records the lock as held.
    pub(crate) fn register(&self, req: &Request) -> bool {
        if !self.test(req) {
            return false;
        }
        match self.policy {
            Policy::ReadWrite | Policy::ReadOnly => {
                if req.read {
                    self.reading.set(self.reading.get() + 1);
                } else {
                    self.writing.set(self.writing.get() + 1);
                }
            }
            Policy::WriteOnly | Policy::Dumb => {
                self.writing.set(self.writing.get() + 1);
            }
            Policy::Broken => unreachable!("broken trackers deny everything"),
        }
        if self.ordered {
            if req.order == 0 {
                self.unordered_held.set(self.unordered_held.get() + 1);
            } else {
                let inserted = self.ordered_held.borrow_mut().insert(req.order);
                debug_assert!(inserted, "order {} already held", req.order);
            }
        }
        true
    }

    /// Records the release of a lock previously registered with the same
    /// `read` and `order`.
    pub(crate) fn release(&self, read: bool, order: u64) {
        match self.policy {
            Policy::ReadWrite | Policy::ReadOnly => {
                // The counters are not cross-checked here: the writer-then-
                // reader exception makes mixed states legal.
                if read {
                    debug_assert!(self.reading.get() > 0);
                    self.reading.set(self.reading.get() - 1);
                } else {
                    debug_assert!(self.writing.get() > 0);
                    self.writing.set(self.writing.get() - 1);
                }
            }
            Policy::WriteOnly | Policy::Dumb => {
                debug_assert!(self.writing.get() > 0);
                self.writing.set(self.writing.get() - 1);
            }
            Policy::Broken => {
                debug_assert!(false, "broken trackers never grant a lock");
            }
        }
        if self.ordered {
            if order == 0 {
                debug_assert!(self.unordered_held.get() > 0);
                self.unordered_held.set(self.unordered_held.get() - 1);
            } else {
                let removed = self.ordered_held.borrow_mut().remove(&order);
                debug_assert!(removed, "order {order} released but not held");
            }
        }
    }

    fn base_allows(&self, read: bool, lock_out: bool, in_use: bool) -> bool {
        let reading = self.reading.get() > 0;
        let writing = self.writing.get() > 0;
        match self.policy {
            Policy::ReadWrite => {
                if writing && in_use {
                    return false;
                }
                if reading && !read && in_use {
                    return false;
                }
                !((reading || writing) && lock_out)
            }
            Policy::ReadOnly => read && !(reading && lock_out),
            Policy::WriteOnly => !(writing && in_use),
            Policy::Dumb => !writing,
            Policy::Broken => false,
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        debug_assert!(
            self.reading.get() == 0 && self.writing.get() == 0,
            "tracker dropped while holding locks",
        );
        debug_assert!(
            self.unordered_held.get() == 0 && self.ordered_held.borrow().is_empty(),
            "tracker dropped while holding ordered locks",
        );
    }
}

impl Debug for Tracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("policy", &self.policy)
            .field("ordered", &self.ordered)
            .field("reading", &self.reading.get())
            .field("writing", &self.writing.get())
            .finish_non_exhaustive()
    }
}
