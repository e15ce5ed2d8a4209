use {
    crate::{
        cell::LockCell,
        meta::MetaLock,
        raw::BrokenLock,
        tracker::{Policy, Tracker},
    },
    std::thread,
};

fn run_in_thread<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    thread::scope(|s| s.spawn(f).join().unwrap())
}

#[test]
fn clone_shares_one_acquisition() {
    let cell: LockCell<i32> = LockCell::new(5);
    let first = cell.read().unwrap();
    let second = first.clone();

    drop(first);
    // The clone still holds the read lock.
    run_in_thread(|| {
        assert_eq!(cell.try_write().is_none(), true);
    });

    drop(second);
    run_in_thread(|| {
        assert_eq!(cell.try_write().is_some(), true);
    });
}

#[test]
fn equality_follows_the_value() {
    let cell: LockCell<i32> = LockCell::new(1);
    let other: LockCell<i32> = LockCell::new(1);

    let first = cell.read().unwrap();
    let second = first.clone();
    let third = cell.read().unwrap();
    let elsewhere = other.read().unwrap();

    assert_eq!(first == second, true);
    // Distinct acquisitions on the same cell still compare equal.
    assert_eq!(first == third, true);
    assert_eq!(first == elsewhere, false);
}

#[test]
fn write_then_read_same_value() {
    let cell: LockCell<String> = LockCell::new(String::new());
    {
        let mut write = cell.write().unwrap();
        write.value_mut().push_str("hello");
        assert_eq!(&*write, "hello");
    }
    assert_eq!(&*cell.read().unwrap(), "hello");
}

#[test]
fn writer_then_reader_handles() {
    let cell: LockCell<i32> = LockCell::new(3);
    let writer = Tracker::new(Policy::ReadWrite);
    let other = Tracker::new(Policy::ReadWrite);

    let write = cell.write_auth(&writer).unwrap();
    let read = cell.read_auth(&writer).unwrap();
    assert_eq!(write == read, true);
    assert_eq!(*read, 3);

    // The exception is per tracker, not per thread.
    assert_eq!(cell.try_read_auth(&other).is_none(), true);
}

#[test]
fn value_mut_suspends_the_exception() {
    let cell: LockCell<i32> = LockCell::new(0);
    let tracker = Tracker::new(Policy::ReadWrite);

    let mut write = cell.write_auth(&tracker).unwrap();
    let mut value = write.value_mut();
    *value += 1;
    // While the value is borrowed mutably, the same tracker cannot take the
    // writer-then-reader path.
    assert_eq!(cell.read_auth(&tracker).is_none(), true);
    drop(value);
    assert_eq!(cell.read_auth(&tracker).is_some(), true);
}

#[test]
fn value_mut_is_repeatable() {
    let cell: LockCell<i32> = LockCell::new(0);
    let mut write = cell.write().unwrap();
    *write.value_mut() = 1;
    *write.value_mut() += 1;
    assert_eq!(*write, 2);
}

#[test]
#[should_panic = "locked for reading"]
fn value_mut_rejects_live_readers() {
    let cell: LockCell<i32> = LockCell::new(0);
    let tracker = Tracker::new(Policy::ReadWrite);

    let mut write = cell.write_auth(&tracker).unwrap();
    let _read = cell.read_auth(&tracker).unwrap();
    let _ = write.value_mut();
}

#[test]
fn broken_cell_has_no_handles() {
    let cell: LockCell<i32, BrokenLock> = LockCell::new(9);
    assert_eq!(cell.read().is_none(), true);
    assert_eq!(cell.write().is_none(), true);
    assert_eq!(cell.try_read().is_none(), true);
    assert_eq!(cell.try_write().is_none(), true);
}

#[test]
fn failed_acquisition_returns_the_meta_probe() {
    let meta = MetaLock::new();
    let cell: LockCell<i32> = LockCell::new(0);
    let tracker = Tracker::new(Policy::ReadWrite);

    let write = cell.write().unwrap();
    // The cell is busy, so the probe of the meta-lock's read side has to be
    // undone.
    assert_eq!(cell.try_write_multi(&meta, &tracker).is_none(), true);
    drop(write);

    // If the probe had leaked, the freeze would see a reader and fail.
    assert_eq!(meta.try_write_auth(&tracker).is_some(), true);
}
