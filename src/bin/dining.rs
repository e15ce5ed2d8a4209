//! Dining-philosophers harness.
//!
//! Each philosopher takes a write lock on the chopstick to the left and then
//! a read lock on the one to the right, which deadlocks unless one of the
//! prevention strategies is in play. The flags select the strategy, the lock
//! primitive and the tracker policy; the process exits 0 on success, 1 on bad
//! arguments, 2 on a thread failure, 3 when the deadlock watchdog fires, 4
//! when a lock operation fails that never should, and 5 on an OS error.

use {
    lockcell::{
        DumbLock, LockCell, MetaLock, Ordered, Policy, RawLock, ReadHandle, RwLock, Tracker,
        WriteHandle, WriteLock,
    },
    std::{
        env, process,
        sync::{Arc, Barrier},
        thread,
        time::{Duration, Instant},
    },
};

const SUCCESS: i32 = 0;
const ERROR_ARGS: i32 = 1;
const ERROR_THREAD: i32 = 2;
const ERROR_DEADLOCK: i32 = 3;
const ERROR_LOGIC: i32 = 4;
const ERROR_SYSTEM: i32 = 5;

struct Chopstick {
    value: i64,
    retries: i64,
}

impl Chopstick {
    fn new() -> Self {
        Self {
            value: -1,
            retries: 0,
        }
    }
}

/// One chopstick cell, with the lock primitive erased.
trait ProtectedChopstick: Send + Sync {
    fn lock_order(&self) -> u64;

    fn grab_write<'a>(
        &'a self,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<WriteHandle<'a, Chopstick>>;

    fn grab_read<'a>(
        &'a self,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<ReadHandle<'a, Chopstick>>;
}

impl<L> ProtectedChopstick for LockCell<Chopstick, L>
where
    L: RawLock,
{
    fn lock_order(&self) -> u64 {
        self.order()
    }

    fn grab_write<'a>(
        &'a self,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<WriteHandle<'a, Chopstick>> {
        match (meta, tracker) {
            (Some(meta), Some(tracker)) => self.write_multi(meta, tracker),
            (None, Some(tracker)) => self.write_auth(tracker),
            _ => self.write(),
        }
    }

    fn grab_read<'a>(
        &'a self,
        tracker: Option<&'a Tracker>,
        meta: Option<&'a MetaLock>,
    ) -> Option<ReadHandle<'a, Chopstick>> {
        match (meta, tracker) {
            (Some(meta), Some(tracker)) => self.read_multi(meta, tracker),
            (None, Some(tracker)) => self.read_auth(tracker),
            _ => self.read(),
        }
    }
}

#[derive(Copy, Clone)]
struct Config {
    threads: usize,
    lock_method: u32,
    try_deadlock: bool,
    lock_type: u32,
    auth_type: u32,
    timeout: u64,
}

fn usage(name: &str, message: Option<&str>) -> ! {
    if let Some(message) = message {
        eprintln!("{name}: {message}");
    }
    eprintln!("{name} [threads] [lock method] [deadlock?] [lock type] [auth type] (timeout)");
    eprintln!("[threads]: number of threads to run (2-256)");
    eprintln!("[lock method]: cell locking method to use");
    eprintln!("  0: unsafe (no deadlock prevention)");
    eprintln!("  1: authorization only");
    eprintln!("  2: multi-locking");
    eprintln!("  3: ordered locking");
    eprintln!("[deadlock?]: attempt to cause a deadlock? (0/1)");
    eprintln!("[lock type]: type of cell locks to use");
    eprintln!("  0: read-write");
    eprintln!("  1: write-only");
    eprintln!("  2: dumb");
    eprintln!("[auth type]: type of tracker to use");
    eprintln!("  0: read-write");
    eprintln!("  1: write-only");
    eprintln!("  2: ordered read-write");
    eprintln!("  3: ordered write-only");
    eprintln!("(timeout): seconds to wait for a deadlock (default: 1)");
    process::exit(ERROR_ARGS);
}

fn parse_args() -> Config {
    let args: Vec<String> = env::args().collect();
    let name = args
        .first()
        .map(String::as_str)
        .unwrap_or("dining")
        .to_string();
    if args.len() != 6 && args.len() != 7 {
        usage(&name, None);
    }
    let field = |index: usize, message: &str| -> i64 {
        match args[index].parse() {
            Ok(value) => value,
            Err(_) => usage(&name, Some(message)),
        }
    };

    let threads = field(1, "invalid number of threads");
    if !(2..=256).contains(&threads) {
        usage(&name, Some("invalid number of threads"));
    }
    let lock_method = field(2, "invalid lock method");
    if !(0..=3).contains(&lock_method) {
        usage(&name, Some("invalid lock method"));
    }
    let try_deadlock = field(3, "invalid deadlock value");
    if !(0..=1).contains(&try_deadlock) {
        usage(&name, Some("invalid deadlock value"));
    }
    let lock_type = field(4, "invalid lock type");
    if !(0..=2).contains(&lock_type) {
        usage(&name, Some("invalid lock type"));
    }
    let auth_type = field(5, "invalid auth type");
    if !(0..=3).contains(&auth_type) {
        usage(&name, Some("invalid auth type"));
    }
    let timeout = if args.len() == 7 {
        let timeout = field(6, "invalid timeout value");
        if timeout < 1 {
            usage(&name, Some("invalid timeout value"));
        }
        timeout
    } else {
        1
    };

    if lock_method == 0 && auth_type != 0 {
        usage(&name, Some("auth type must be 0 with unsafe locking"));
    }
    if lock_method == 3 && auth_type < 2 {
        usage(&name, Some("auth type must be >= 2 with ordered locks"));
    }
    if lock_method == 2 && try_deadlock == 1 {
        usage(&name, Some("cannot cause a deadlock with multi-locking"));
    }

    Config {
        threads: threads as usize,
        lock_method: lock_method as u32,
        try_deadlock: try_deadlock == 1,
        lock_type: lock_type as u32,
        auth_type: auth_type as u32,
        timeout: timeout as u64,
    }
}

fn new_chopsticks(config: &Config) -> Vec<Arc<dyn ProtectedChopstick>> {
    (0..config.threads)
        .map(|i| -> Arc<dyn ProtectedChopstick> {
            // Lock order must be > 0 for the order rules to apply.
            let order = i as u64 + 1;
            match (config.lock_method, config.lock_type) {
                (3, 0) => Arc::new(LockCell::with_lock(
                    Chopstick::new(),
                    Ordered::<RwLock>::new(order),
                )),
                (3, 1) => Arc::new(LockCell::with_lock(
                    Chopstick::new(),
                    Ordered::<WriteLock>::new(order),
                )),
                (3, _) => Arc::new(LockCell::with_lock(
                    Chopstick::new(),
                    Ordered::<DumbLock>::new(order),
                )),
                (_, 0) => Arc::new(LockCell::<_, RwLock>::new(Chopstick::new())),
                (_, 1) => Arc::new(LockCell::<_, WriteLock>::new(Chopstick::new())),
                _ => Arc::new(LockCell::<_, DumbLock>::new(Chopstick::new())),
            }
        })
        .collect()
}

fn new_tracker(config: &Config) -> Option<Tracker> {
    if config.lock_method == 0 {
        return None;
    }
    Some(match config.auth_type {
        0 => Tracker::new(Policy::ReadWrite),
        1 => Tracker::new(Policy::WriteOnly),
        2 => Tracker::ordered(Policy::ReadWrite),
        _ => Tracker::ordered(Policy::WriteOnly),
    })
}

fn timed_wait() {
    thread::sleep(Duration::from_millis(10));
}

fn eat_dinner(
    number: usize,
    left: &dyn ProtectedChopstick,
    right: &dyn ProtectedChopstick,
    tracker: Option<&Tracker>,
    meta: Option<&MetaLock>,
    try_deadlock: bool,
) {
    let mut retries: i64 = 0;
    loop {
        // Back off with everything unlocked so the table can drain; skipping
        // the wait on alternating retries lets the threads fall out of sync
        // in case the cadence itself is what livelocks.
        if retries > 0 && (retries + number as i64 + 1) % 2 == 1 {
            timed_wait();
        }

        if let Some(tracker) = tracker {
            // A tracker that can never authorize these locks is a setup bug,
            // not contention.
            if !tracker.guess_write_allowed(false, false, left.lock_order()) {
                process::exit(ERROR_LOGIC);
            }
            if meta.is_some() && !tracker.guess_read_allowed(false, false, 0) {
                process::exit(ERROR_LOGIC);
            }
        }

        // With multi-locking the freeze always succeeds eventually.
        let frozen = match (meta, tracker) {
            (Some(meta), Some(tracker)) => {
                let frozen = meta.write_auth(tracker);
                if frozen.is_none() {
                    process::exit(ERROR_LOGIC);
                }
                frozen
            }
            _ => None,
        };
        let using_multi = frozen.is_some();

        let Some(mut left_write) = left.grab_write(tracker, meta) else {
            process::exit(ERROR_LOGIC);
        };

        // Make a potential deadlock as likely as possible.
        if try_deadlock {
            timed_wait();
        }

        let right_read = right.grab_read(tracker, meta);
        // Unfreeze as soon as possible.
        drop(frozen);

        let Some(right_read) = right_read else {
            // Denied by the tracker; drop the left chopstick and try again.
            if using_multi {
                process::exit(ERROR_LOGIC);
            }
            drop(left_write);
            retries += 1;
            continue;
        };

        // Pass on the right chopstick's number if it was already used.
        let value = if right_read.value < 0 {
            number as i64
        } else {
            right_read.value
        };
        let mut stick = left_write.value_mut();
        stick.value = value;
        stick.retries = retries;
        println!("thread:\t{number}\t{}\t{}", stick.value, stick.retries);
        break;
    }
}

fn main() {
    let config = parse_args();

    let chopsticks = new_chopsticks(&config);
    let meta = (config.lock_method == 2).then(|| Arc::new(MetaLock::new()));
    let barrier = Arc::new(Barrier::new(config.threads + 1));

    let start = Instant::now();

    let mut threads = Vec::with_capacity(config.threads);
    for number in 0..config.threads {
        let left = chopsticks[number].clone();
        let right = chopsticks[(number + 1) % config.threads].clone();
        let meta = meta.clone();
        let barrier = barrier.clone();
        let spawned = thread::Builder::new()
            .name(format!("philosopher-{number}"))
            .spawn(move || {
                // One tracker per thread, created on that thread.
                let tracker = new_tracker(&config);
                barrier.wait();
                eat_dinner(
                    number,
                    &*left,
                    &*right,
                    tracker.as_ref(),
                    meta.as_deref(),
                    config.try_deadlock,
                );
                barrier.wait();
            });
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(_) => process::exit(ERROR_SYSTEM),
        }
    }

    let timeout = Duration::from_secs(config.timeout);
    thread::spawn(move || {
        thread::sleep(timeout);
        println!("(deadlock timeout)");
        process::exit(ERROR_DEADLOCK);
    });

    // Let the philosophers loose, then wait for the last to finish.
    barrier.wait();
    barrier.wait();
    for handle in threads {
        if handle.join().is_err() {
            process::exit(ERROR_THREAD);
        }
    }

    // An ordered read-write tracker can read every cell variant used here.
    let collector = Tracker::ordered(Policy::ReadWrite);
    for (i, chopstick) in chopsticks.iter().enumerate() {
        let Some(read) = chopstick.grab_read(Some(&collector), None) else {
            process::exit(ERROR_LOGIC);
        };
        println!("final:\t{i}\t{}\t{}", read.value, read.retries);
    }

    println!("time: {:.6}", start.elapsed().as_secs_f64());
    process::exit(SUCCESS);
}
