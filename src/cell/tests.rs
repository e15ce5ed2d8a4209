use {
    crate::{
        cell::{try_copy, try_copy_auth, try_copy_multi, LockCell},
        meta::MetaLock,
        raw::{DumbLock, Ordered, ReadLock, RwLock, WriteLock},
        tracker::{Policy, Tracker},
    },
    std::thread,
};

fn run_in_thread<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    thread::scope(|s| s.spawn(f).join().unwrap())
}

#[test]
fn read_write() {
    let cell: LockCell<i32> = LockCell::new(1);
    {
        let mut write = cell.write().unwrap();
        *write.value_mut() = 2;
    }
    let first = cell.read().unwrap();
    let second = cell.read().unwrap();
    assert_eq!(*first, 2);
    assert_eq!(*second, 2);
}

#[test]
fn exclusive_access_without_locking() {
    let mut cell: LockCell<i32> = LockCell::new(1);
    *cell.get_mut() += 1;
    assert_eq!(cell.into_inner(), 2);
}

#[test]
fn non_blocking_write_under_contention() {
    let cell: LockCell<i32> = LockCell::new(0);
    let read = cell.read().unwrap();
    run_in_thread(|| {
        assert_eq!(cell.try_write().is_none(), true);
    });
    drop(read);
    run_in_thread(|| {
        assert_eq!(cell.try_write().is_some(), true);
    });
}

#[test]
fn read_only_cell() {
    let cell: LockCell<i32, ReadLock> = LockCell::new(7);
    let handles: Vec<_> = (0..64).map(|_| cell.read().unwrap()).collect();
    assert_eq!(handles.iter().all(|h| **h == 7), true);
    assert_eq!(cell.write().is_none(), true);
    assert_eq!(cell.try_write().is_none(), true);
}

#[test]
fn write_only_cell_is_exclusive() {
    let cell: LockCell<i32, WriteLock> = LockCell::new(0);
    let read = cell.read().unwrap();
    // Reads hold the one slot there is.
    run_in_thread(|| {
        assert_eq!(cell.try_read().is_none(), true);
        assert_eq!(cell.try_write().is_none(), true);
    });
    drop(read);
    run_in_thread(|| {
        assert_eq!(cell.try_write().is_some(), true);
    });
}

#[test]
fn dumb_cell_is_exclusive() {
    let cell: LockCell<i32, DumbLock> = LockCell::new(0);
    let read = cell.read().unwrap();
    run_in_thread(|| {
        assert_eq!(cell.try_read().is_none(), true);
    });
    drop(read);
}

#[test]
fn ordered_dumb_is_degenerate() {
    let first = LockCell::with_lock(1, Ordered::<DumbLock>::new(1));
    let second = LockCell::with_lock(2, Ordered::<DumbLock>::new(2));
    let tracker = Tracker::ordered(Policy::Dumb);

    let read = first.read_auth(&tracker).unwrap();
    // Ascending order or not, a dumb tracker holds one lock at a time.
    assert_eq!(second.read_auth(&tracker).is_none(), true);
    drop(read);
    assert_eq!(second.read_auth(&tracker).is_some(), true);
}

#[test]
fn matching_trackers_are_compatible() {
    let cell: LockCell<i32, Ordered<WriteLock>> = LockCell::with_lock(0, Ordered::new(5));
    let tracker = LockCell::<i32, Ordered<WriteLock>>::new_tracker();
    assert_eq!(cell.order(), 5);
    assert_eq!(cell.write_auth(&tracker).is_some(), true);
}

#[test]
fn copies_value_between_cells() {
    let src: LockCell<i32> = LockCell::new(3);
    let dst: LockCell<i32> = LockCell::new(0);

    assert_eq!(try_copy(&dst, &src, true), true);
    assert_eq!(*dst.read().unwrap(), 3);
}

#[test]
fn copy_fails_on_contention() {
    let src: LockCell<i32> = LockCell::new(3);
    let dst: LockCell<i32> = LockCell::new(0);

    let write = dst.write().unwrap();
    run_in_thread(|| {
        assert_eq!(try_copy(&dst, &src, false), false);
    });
    drop(write);
    assert_eq!(try_copy(&dst, &src, false), true);
}

#[test]
fn copy_respects_lock_order() {
    let low = LockCell::with_lock(10, Ordered::<RwLock>::new(1));
    let high = LockCell::with_lock(0, Ordered::<RwLock>::new(2));
    let tracker = Tracker::ordered(Policy::ReadWrite);

    // Both directions succeed: the lower order is taken first either way.
    assert_eq!(try_copy_auth(&high, &low, &tracker, true), true);
    assert_eq!(*high.read_auth(&tracker).unwrap(), 10);
    assert_eq!(try_copy_auth(&low, &high, &tracker, true), true);
    assert_eq!(*low.read_auth(&tracker).unwrap(), 10);
}

#[test]
fn copy_under_meta_lock() {
    let meta = MetaLock::new();
    let src: LockCell<i32> = LockCell::new(4);
    let dst: LockCell<i32> = LockCell::new(0);
    let tracker = Tracker::new(Policy::ReadWrite);

    assert_eq!(try_copy_multi(&dst, &src, &meta, &tracker, true, true), true);
    assert_eq!(*dst.read().unwrap(), 4);

    // With try_multi off, the caller provides the freeze.
    let freeze = meta.write_auth(&tracker).unwrap();
    assert_eq!(try_copy_multi(&src, &dst, &meta, &tracker, true, false), true);
    drop(freeze);
}

struct Node {
    id: u64,
    out: Vec<u64>,
    incoming: Vec<u64>,
}

impl Node {
    fn new(id: u64) -> Self {
        Self {
            id,
            out: vec![],
            incoming: vec![],
        }
    }
}

type NodeCell = LockCell<Node, Ordered<RwLock>>;

/// Adds an edge from `a` to `b`, locking the lower-ordered node first.
fn connect(a: &NodeCell, b: &NodeCell, tracker: &Tracker) -> bool {
    let a_first = a.order() < b.order();
    let (first, second) = if a_first { (a, b) } else { (b, a) };
    let Some(mut first_write) = first.write_auth(tracker) else {
        return false;
    };
    let Some(mut second_write) = second.write_auth(tracker) else {
        return false;
    };
    let (from, to) = if a_first {
        (&mut first_write, &mut second_write)
    } else {
        (&mut second_write, &mut first_write)
    };
    let target = to.id;
    let source = from.id;
    from.value_mut().out.push(target);
    to.value_mut().incoming.push(source);
    true
}

#[test]
fn graph_edges_in_lock_order() {
    let left = LockCell::with_lock(Node::new(1), Ordered::new(1));
    let right = LockCell::with_lock(Node::new(2), Ordered::new(2));
    let tracker = Tracker::ordered(Policy::ReadWrite);

    // Argument order does not matter; lock order decides.
    assert_eq!(connect(&left, &right, &tracker), true);
    assert_eq!(connect(&right, &left, &tracker), true);

    let left = left.read_auth(&tracker).unwrap();
    let right = right.read_auth(&tracker).unwrap();
    assert_eq!(left.out, [2]);
    assert_eq!(left.incoming, [2]);
    assert_eq!(right.out, [1]);
    assert_eq!(right.incoming, [1]);
}

#[test]
fn debug_renders_value_or_locked() {
    let cell: LockCell<i32> = LockCell::new(3);
    assert_eq!(format!("{cell:?}").contains('3'), true);

    let write = cell.write().unwrap();
    assert_eq!(format!("{cell:?}").contains("<locked>"), true);
    drop(write);
}
