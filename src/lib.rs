//! This crate provides [`LockCell`], a container that pairs a value with a
//! lock and only hands the value out through scoped access handles, plus the
//! machinery to hold many such cells at once without deadlocking.
//!
//! # Motivation
//!
//! Scoped guards solve the first locking bug, forgetting to unlock. They do
//! nothing about the second one: two threads that each hold a lock and wait
//! for the other's. Lock-free designs dodge the problem; most programs
//! instead rely on conventions ("always take A before B") that nothing
//! checks.
//!
//! This crate makes the conventions checkable at runtime:
//!
//! 1. Every thread carries a [`Tracker`] that counts the locks the thread
//!    holds. Each acquisition asks the tracker first, and the tracker denies
//!    any request that could close a wait cycle. Denial is immediate and
//!    surfaces as `None`; the thread keeps running and decides what to do.
//! 2. For the cases where a thread legitimately needs many locks at once,
//!    two protocols are provided. A [`MetaLock`] can freeze all participating
//!    cells so one thread may lock any number of them; alternatively,
//!    [`Ordered`] locks carry a total order and trackers enforce strictly
//!    ascending acquisition, which makes cycles impossible without any global
//!    contention.
//!
//! # Example
//!
//! ```
//! use lockcell::{LockCell, Policy, Tracker};
//!
//! let account: LockCell<i64> = LockCell::new(100);
//! let audit: LockCell<Vec<i64>> = LockCell::new(vec![]);
//!
//! let tracker = Tracker::new(Policy::ReadWrite);
//!
//! // An ordinary protected update.
//! let mut balance = account.write_auth(&tracker).unwrap();
//! *balance.value_mut() -= 25;
//!
//! // Another holder appears on the audit cell...
//! let outside = audit.read().unwrap();
//!
//! // ...so waiting for its write lock while we hold `balance` could
//! // deadlock, and the tracker refuses to let us try.
//! assert!(audit.write_auth(&tracker).is_none());
//!
//! // Once nothing is held, the same request goes through.
//! drop(balance);
//! drop(outside);
//! let mut log = audit.write_auth(&tracker).unwrap();
//! log.value_mut().push(-25);
//! ```
//!
//! # Choosing a primitive
//!
//! The second type parameter of [`LockCell`] selects the lock:
//!
//! - [`RwLock`] (the default) allows many readers or one writer.
//! - [`WriteLock`] has a single holder and no reader bookkeeping; faster when
//!   concurrent reads are not needed.
//! - [`ReadLock`] allows unbounded readers and never a writer.
//! - [`DumbLock`] is a bare mutex that opts out of all bookkeeping.
//! - [`Ordered`] wraps any of the above and attaches an acquisition order.
//! - [`BrokenLock`] always fails, for testing pathological paths.
//!
//! Each primitive has a matching [`Policy`] for trackers;
//! [`LockCell::new_tracker`] picks the right one by construction.
//!
//! # Costs
//!
//! A cell acquisition is a mutex lock, a handful of counter updates and a
//! mutex unlock; contended acquisitions park on a condition variable. The
//! meta-lock adds one probe of an uncontended read side to every
//! participating acquisition, and only costs anything while a thread holds
//! its write side. Trackers are plain thread-local counters.

pub use {
    cell::{try_copy, try_copy_auth, try_copy_multi, LockCell},
    handle::{ReadHandle, ValueMut, WriteHandle},
    meta::{MetaLock, MetaReadGuard, MetaWriteGuard},
    raw::{BrokenLock, DumbLock, Ordered, RawLock, ReadLock, RwLock, WriteLock},
    tracker::{Policy, Tracker},
};

mod cell;
mod handle;
mod meta;
mod raw;
mod tracker;
