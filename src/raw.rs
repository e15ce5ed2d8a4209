use {
    crate::tracker::{Policy, Request, Tracker},
    parking_lot::{
        Condvar, Mutex, RawMutex,
        lock_api::RawMutex as RawMutexTrait,
    },
    std::sync::atomic::{AtomicU64, Ordering::Relaxed},
};


mod sealed {
    pub trait Sealed {}
}

/// A lock primitive that a [`LockCell`](crate::LockCell) can be built over.
///
/// This trait is sealed; the implementors are [`RwLock`], [`WriteLock`],
/// [`ReadLock`], [`DumbLock`], [`BrokenLock`] and the [`Ordered`] decorator.
///
/// Every operation takes the tracker of the calling thread (if any), whether
/// the request is for reading, whether the caller is willing to block, and
/// whether this is a probe. A probe consults the tracker without recording
/// anything in it; the meta-lock's read side is taken this way.
pub trait RawLock: sealed::Sealed + Send + Sync {
    #[doc(hidden)]
    fn acquire_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        block: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64>;

    #[doc(hidden)]
    fn release_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64>;

    /// Attempts to acquire this lock.
    ///
    /// Returns the current number of read locks on success and `None` on
    /// denial. Denial is always immediate; a grant blocks only if `block` is
    /// `true` and only after the tracker has authorized the request.
    fn acquire(&self, tracker: Option<&Tracker>, read: bool, block: bool, probe: bool) -> Option<u64> {
        self.acquire_at(tracker, read, block, probe, self.order())
    }

    /// Releases this lock.
    ///
    /// Must be paired with a successful [`acquire`](RawLock::acquire) with the
    /// same `tracker`, `read` and `probe`. Returns the new number of read
    /// locks.
    fn release(&self, tracker: Option<&Tracker>, read: bool, probe: bool) -> Option<u64> {
        self.release_at(tracker, read, probe, self.order())
    }

    /// The order this lock carries. 0 means unordered.
    fn order(&self) -> u64 {
        0
    }

    #[doc(hidden)]
    fn acquire_value_mut(&self) -> bool {
        true
    }

    #[doc(hidden)]
    fn release_value_mut(&self) {}

    /// The tracker policy whose rules match this lock's blocking behavior.
    fn matching_policy() -> Policy
    where
        Self: Sized;

    /// Creates a tracker that is compatible with this lock by construction.
    fn matching_tracker() -> Tracker
    where
        Self: Sized,
    {
        Tracker::new(Self::matching_policy())
    }
}

fn register_or_test_auth(
    tracker: Option<&Tracker>,
    read: bool,
    block: bool,
    lock_out: bool,
    in_use: bool,
    probe: bool,
    order: u64,
) -> bool {
    let Some(tracker) = tracker else {
        return true;
    };
    let request = Request {
        read,
        block,
        lock_out,
        in_use,
        order,
    };
    if probe {
        tracker.test(&request)
    } else {
        tracker.register(&request)
    }
}

fn release_auth(tracker: Option<&Tracker>, read: bool, probe: bool, order: u64) {
    if probe {
        return;
    }
    if let Some(tracker) = tracker {
        tracker.release(read, order);
    }
}

/// Lock primitive that allows many readers or one writer.
///
/// A write request first locks out new readers and then waits for the
/// existing ones to drain, so writers cannot be starved. The holder of the
/// write lock may additionally acquire read locks on the same primitive, but
/// only through the tracker it wrote with; this is the hook that makes the
/// meta-lock protocol work.
///
/// This is the default lock of [`LockCell`](crate::LockCell).
pub struct RwLock {
    state: Mutex<RwState>,
    read_wait: Condvar,
    write_wait: Condvar,
}

struct RwState {
    readers: u64,
    readers_waiting: u64,
    writer: bool,
    writer_waiting: bool,
    // Tracker identity of the writer, for the writer-then-reader exception.
    current_writer: Option<usize>,
    // The writer has the value borrowed mutably; reads must be denied.
    value_mut: bool,
}

impl RwState {
    fn in_use(&self) -> bool {
        self.writer || self.readers > 0
    }
}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RwState {
                readers: 0,
                readers_waiting: 0,
                writer: false,
                writer_waiting: false,
                current_writer: None,
                value_mut: false,
            }),
            read_wait: Condvar::new(),
            write_wait: Condvar::new(),
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl sealed::Sealed for RwLock {}

impl RawLock for RwLock {
    fn acquire_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        block: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        if read {
            let reentrant = state.writer
                && tracker.is_some()
                && state.current_writer == tracker.map(Tracker::id);
            if reentrant && state.value_mut {
                return None;
            }
            // The current writer re-requesting a read bypasses the lock-out
            // and in-use checks.
            let (lock_out, in_use) = if reentrant {
                (false, false)
            } else {
                (state.writer_waiting, state.in_use())
            };
            if !register_or_test_auth(tracker, true, block, lock_out, in_use, probe, order) {
                return None;
            }
            if !reentrant {
                if !block && (state.writer || state.writer_waiting) {
                    release_auth(tracker, true, probe, order);
                    return None;
                }
                state.readers_waiting += 1;
                while state.writer || state.writer_waiting {
                    self.read_wait.wait(&mut state);
                }
                state.readers_waiting -= 1;
            }
            state.readers += 1;
            Some(state.readers)
        } else {
            if !register_or_test_auth(
                tracker,
                false,
                block,
                state.writer_waiting,
                state.in_use(),
                probe,
                order,
            ) {
                return None;
            }
            if !block && (state.writer || state.writer_waiting || state.readers > 0) {
                release_auth(tracker, false, probe, order);
                return None;
            }
            // Queue up behind a writer that got here first. Write releases
            // broadcast on read_wait; the next writer is blocking in
            // write_wait below.
            state.readers_waiting += 1;
            while state.writer_waiting {
                self.read_wait.wait(&mut state);
            }
            state.readers_waiting -= 1;
            state.writer_waiting = true;
            while state.writer || state.readers > 0 {
                self.write_wait.wait(&mut state);
            }
            state.writer_waiting = false;
            state.writer = true;
            state.current_writer = tracker.map(Tracker::id);
            Some(0)
        }
    }

    fn release_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        release_auth(tracker, read, probe, order);
        if read {
            debug_assert!(state.readers > 0);
            state.readers -= 1;
            if state.readers == 0 && state.writer_waiting {
                self.write_wait.notify_all();
            }
            Some(state.readers)
        } else {
            // Reentrant readers may outlive the write lock, so readers is not
            // required to be 0 here.
            debug_assert!(state.writer && !state.value_mut);
            state.writer = false;
            state.current_writer = None;
            if state.writer_waiting {
                self.write_wait.notify_all();
            }
            if state.readers_waiting > 0 {
                self.read_wait.notify_all();
            }
            Some(state.readers)
        }
    }

    fn acquire_value_mut(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.writer);
        if state.readers > 0 || state.value_mut {
            return false;
        }
        state.value_mut = true;
        true
    }

    fn release_value_mut(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.value_mut);
        state.value_mut = false;
    }

    fn matching_policy() -> Policy {
        Policy::ReadWrite
    }
}

/// Lock primitive with a single holder and no reader/writer distinction.
///
/// Faster than [`RwLock`] when concurrent reads are not needed. For deadlock
/// prevention every acquisition counts as a write, including requests made
/// through the read operations of a cell.
pub struct WriteLock {
    state: Mutex<WriteState>,
    write_wait: Condvar,
}

struct WriteState {
    locked: bool,
    writers_waiting: u64,
}

impl WriteLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(WriteState {
                locked: false,
                writers_waiting: 0,
            }),
            write_wait: Condvar::new(),
        }
    }
}

impl Default for WriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl sealed::Sealed for WriteLock {}

impl RawLock for WriteLock {
    fn acquire_at(
        &self,
        tracker: Option<&Tracker>,
        _read: bool,
        block: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        // read is ignored: this lock can lock out readers, so the tracker
        // must treat the request as a write.
        if !register_or_test_auth(
            tracker,
            false,
            block,
            state.writers_waiting > 0,
            state.locked,
            probe,
            order,
        ) {
            return None;
        }
        if state.locked {
            if !block {
                release_auth(tracker, false, probe, order);
                return None;
            }
            state.writers_waiting += 1;
            while state.locked {
                self.write_wait.wait(&mut state);
            }
            state.writers_waiting -= 1;
        }
        state.locked = true;
        Some(0)
    }

    fn release_at(
        &self,
        tracker: Option<&Tracker>,
        _read: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        debug_assert!(state.locked);
        state.locked = false;
        release_auth(tracker, false, probe, order);
        if state.writers_waiting > 0 {
            self.write_wait.notify_one();
        }
        Some(0)
    }

    fn matching_policy() -> Policy {
        Policy::WriteOnly
    }
}

/// Lock primitive that allows unbounded readers and no writer, ever.
///
/// This never blocks and never contends; it reports itself to trackers as
/// neither in use nor locking anyone out. Because it is never "in use", cells
/// behind it cannot meaningfully take part in multi-locking.
pub struct ReadLock {
    readers: AtomicU64,
}

impl ReadLock {
    pub const fn new() -> Self {
        Self {
            readers: AtomicU64::new(0),
        }
    }
}

impl Default for ReadLock {
    fn default() -> Self {
        Self::new()
    }
}

impl sealed::Sealed for ReadLock {}

impl RawLock for ReadLock {
    fn acquire_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        block: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        if !read {
            return None;
        }
        if !register_or_test_auth(tracker, true, block, false, false, probe, order) {
            return None;
        }
        let new_readers = self.readers.fetch_add(1, Relaxed) + 1;
        debug_assert!(new_readers > 0);
        Some(new_readers)
    }

    fn release_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        if !read {
            return None;
        }
        release_auth(tracker, true, probe, order);
        let old_readers = self.readers.fetch_sub(1, Relaxed);
        debug_assert!(old_readers > 0);
        Some(old_readers - 1)
    }

    fn matching_policy() -> Policy {
        Policy::ReadOnly
    }
}

/// Lock primitive that does not track readers and writers at all.
///
/// A thin wrapper over a plain mutex. It reports itself to trackers as in use
/// and locking out unconditionally, so a tracker will almost never allow a
/// second lock while one is held; cells behind it cannot take part in
/// multi-locking.
pub struct DumbLock {
    raw: RawMutex,
}

impl DumbLock {
    pub const fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
        }
    }
}

impl Default for DumbLock {
    fn default() -> Self {
        Self::new()
    }
}

impl sealed::Sealed for DumbLock {}

impl RawLock for DumbLock {
    fn acquire_at(
        &self,
        tracker: Option<&Tracker>,
        _read: bool,
        block: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        if !register_or_test_auth(tracker, false, block, true, true, probe, order) {
            return None;
        }
        if block {
            self.raw.lock();
        } else if !self.raw.try_lock() {
            release_auth(tracker, false, probe, order);
            return None;
        }
        Some(0)
    }

    fn release_at(
        &self,
        tracker: Option<&Tracker>,
        _read: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        release_auth(tracker, false, probe, order);
        // SAFETY: - Paired with a successful acquire_at, which locked raw.
        unsafe {
            self.raw.unlock();
        }
        Some(0)
    }

    fn matching_policy() -> Policy {
        Policy::Dumb
    }
}

/// Lock primitive that is permanently broken.
///
/// Every operation fails. Useful for testing pathological cases.
#[derive(Default)]
pub struct BrokenLock;

impl BrokenLock {
    pub const fn new() -> Self {
        Self
    }
}

impl sealed::Sealed for BrokenLock {}

impl RawLock for BrokenLock {
    fn acquire_at(
        &self,
        _tracker: Option<&Tracker>,
        _read: bool,
        _block: bool,
        _probe: bool,
        _order: u64,
    ) -> Option<u64> {
        None
    }

    fn release_at(
        &self,
        _tracker: Option<&Tracker>,
        _read: bool,
        _probe: bool,
        _order: u64,
    ) -> Option<u64> {
        None
    }

    fn matching_policy() -> Policy {
        Policy::Broken
    }
}

/// Decorator that attaches an acquisition order to a base lock.
///
/// Ordered locks are the cheap alternative to the meta-lock: when every cell
/// a program locks together carries a distinct positive order, acquiring them
/// in ascending order makes deadlocks impossible, and an ordered tracker
/// rejects any wait that would violate that order.
///
/// Every operation requires a tracker; without one the request is denied.
///
/// # Example
///
/// ```
/// use lockcell::{LockCell, Ordered, Policy, Tracker};
///
/// let cell = LockCell::with_lock(7, Ordered::<lockcell::WriteLock>::new(3));
/// assert_eq!(cell.order(), 3);
///
/// // No tracker, no lock.
/// assert!(cell.try_write().is_none());
///
/// let tracker = Tracker::ordered(Policy::WriteOnly);
/// assert!(cell.try_write_auth(&tracker).is_some());
/// ```
pub struct Ordered<B = RwLock> {
    order: u64,
    base: B,
}

impl<B> Ordered<B>
where
    B: RawLock + Default,
{
    /// Creates an ordered lock with the given order.
    ///
    /// # Panics
    ///
    /// Panics if `order` is 0; 0 is reserved for unordered locks.
    pub fn new(order: u64) -> Self {
        assert!(order > 0, "ordered locks require a positive order");
        Self {
            order,
            base: B::default(),
        }
    }
}

impl<B> sealed::Sealed for Ordered<B> where B: RawLock {}

impl<B> RawLock for Ordered<B>
where
    B: RawLock,
{
    fn acquire_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        block: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        tracker?;
        self.base.acquire_at(tracker, read, block, probe, order)
    }

    fn release_at(
        &self,
        tracker: Option<&Tracker>,
        read: bool,
        probe: bool,
        order: u64,
    ) -> Option<u64> {
        tracker?;
        self.base.release_at(tracker, read, probe, order)
    }

    fn order(&self) -> u64 {
        self.order
    }

    fn acquire_value_mut(&self) -> bool {
        self.base.acquire_value_mut()
    }

    fn release_value_mut(&self) {
        self.base.release_value_mut()
    }

    fn matching_policy() -> Policy {
        B::matching_policy()
    }

    fn matching_tracker() -> Tracker {
        Tracker::ordered(B::matching_policy())
    }
}
