//! Integration tests for the fiber layer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use modest_engine::{Engine, EngineConfig, Fiber, FiberApi, FiberId, FiberScheduler, PoolConfig};

fn engine(pool_size: usize) -> Engine {
    let config = EngineConfig::new().with_pool(PoolConfig::new().with_size(pool_size));
    Engine::with_config(&config).expect("valid config")
}

/// Records every entry into its body, yielding a fixed number of times.
struct YieldingFiber {
    label: u32,
    yields: u32,
    trace: Arc<Mutex<Vec<u32>>>,
}

impl Fiber for YieldingFiber {
    fn run(&mut self, api: &FiberApi) {
        for _ in 0..self.yields {
            self.trace.lock().push(self.label);
            api.yield_now();
        }
    }
}

/// With one worker, yielding fibers run in strict FIFO rotation.
#[test]
fn single_worker_round_robin() {
    let engine = engine(1);
    engine.start();

    let scheduler = FiberScheduler::new();
    let trace: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    for label in 1..=3 {
        scheduler.add(Box::new(YieldingFiber {
            label,
            yields: 10,
            trace: Arc::clone(&trace),
        }));
    }
    scheduler.start(&engine, 1);
    assert!(scheduler.wait_for_last_exit(true));

    let observed = trace.lock().clone();
    let mut expected = Vec::new();
    for _ in 0..10 {
        expected.extend_from_slice(&[1, 2, 3]);
    }
    assert_eq!(observed, expected);
    engine.stop();
}

struct SleeperFiber {
    woke: Arc<AtomicBool>,
}

impl Fiber for SleeperFiber {
    fn run(&mut self, api: &FiberApi) {
        api.sleep_until_woken();
        self.woke.store(true, Ordering::SeqCst);
    }
}

/// A fiber that sleeps immediately resumes after an external wakeup and
/// runs to exit; the drain completes.
#[test]
fn sleep_then_external_wakeup() {
    let engine = engine(2);
    engine.start();

    let scheduler = FiberScheduler::new();
    scheduler.start(&engine, 2);

    let woke = Arc::new(AtomicBool::new(false));
    let id = scheduler.add(Box::new(SleeperFiber { woke: Arc::clone(&woke) }));

    // Give the fiber time to park itself.
    thread::sleep(Duration::from_millis(50));
    assert!(!woke.load(Ordering::SeqCst));

    scheduler.wakeup(id);
    assert!(scheduler.wait_for_last_exit(true));
    assert!(woke.load(Ordering::SeqCst));
    assert_eq!(scheduler.fiber_count(), 0);
    engine.stop();
}

/// Waking an unknown fiber id is a no-op.
#[test]
fn unknown_wakeup_is_a_noop() {
    let engine = engine(1);
    engine.start();

    let scheduler = FiberScheduler::new();
    scheduler.start(&engine, 1);
    scheduler.wakeup(999_999);

    let trace: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    scheduler.add(Box::new(YieldingFiber {
        label: 7,
        yields: 1,
        trace: Arc::clone(&trace),
    }));
    assert!(scheduler.wait_for_last_exit(true));
    assert_eq!(*trace.lock(), vec![7]);
    engine.stop();
}

/// Fiber ids are assigned from 1, monotonically, and never collide among
/// live fibers.
#[test]
fn fiber_ids_are_unique_and_monotonic() {
    let engine = engine(2);
    engine.start();

    let scheduler = FiberScheduler::new();
    let trace: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let mut ids: Vec<FiberId> = Vec::new();
    for label in 0..5 {
        ids.push(scheduler.add(Box::new(YieldingFiber {
            label,
            yields: 2,
            trace: Arc::clone(&trace),
        })));
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    scheduler.start(&engine, 2);
    assert!(scheduler.wait_for_last_exit(true));
    engine.stop();
}

struct ExitProbeFiber {
    exited: Arc<AtomicU32>,
}

impl Fiber for ExitProbeFiber {
    fn run(&mut self, _api: &FiberApi) {}

    fn exited(&mut self) {
        self.exited.fetch_add(1, Ordering::SeqCst);
    }
}

/// The exited hook fires exactly once per fiber, and the drain returns
/// only after every fiber is gone.
#[test]
fn exited_hook_fires_once_per_fiber() {
    let engine = engine(2);
    engine.start();

    let scheduler = FiberScheduler::new();
    let exited = Arc::new(AtomicU32::new(0));
    for _ in 0..4 {
        scheduler.add(Box::new(ExitProbeFiber { exited: Arc::clone(&exited) }));
    }
    scheduler.start(&engine, 2);
    assert!(scheduler.wait_for_last_exit(true));
    assert_eq!(exited.load(Ordering::SeqCst), 4);
    assert_eq!(scheduler.fiber_count(), 0);
    engine.stop();
}

struct PingPongFiber {
    peer: Arc<Mutex<Option<FiberId>>>,
    scheduler: Arc<FiberScheduler>,
    rounds: u32,
    log: Arc<Mutex<Vec<u32>>>,
    label: u32,
}

impl Fiber for PingPongFiber {
    fn run(&mut self, api: &FiberApi) {
        for _ in 0..self.rounds {
            self.log.lock().push(self.label);
            // Wake the peer (if it is sleeping), then park ourselves.
            if let Some(peer) = *self.peer.lock() {
                self.scheduler.wakeup(peer);
            }
            api.sleep_until_woken();
        }
        // Release the peer so it can finish its remaining rounds.
        if let Some(peer) = *self.peer.lock() {
            self.scheduler.wakeup(peer);
        }
    }
}

/// Two fibers alternate through sleep/wakeup for several rounds; waking a
/// fiber that is not sleeping is harmless. A single worker serializes the
/// exchange, so the interleaving is exact.
#[test]
fn sleep_wake_ping_pong() {
    let engine = engine(1);
    engine.start();

    let scheduler = FiberScheduler::new();
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let peer_of_a = Arc::new(Mutex::new(None));
    let peer_of_b = Arc::new(Mutex::new(None));

    let a = scheduler.add(Box::new(PingPongFiber {
        peer: Arc::clone(&peer_of_a),
        scheduler: Arc::clone(&scheduler),
        rounds: 5,
        log: Arc::clone(&log),
        label: 1,
    }));
    let b = scheduler.add(Box::new(PingPongFiber {
        peer: Arc::clone(&peer_of_b),
        scheduler: Arc::clone(&scheduler),
        rounds: 5,
        log: Arc::clone(&log),
        label: 2,
    }));
    *peer_of_a.lock() = Some(b);
    *peer_of_b.lock() = Some(a);

    scheduler.start(&engine, 1);
    assert!(scheduler.wait_for_last_exit(true));

    assert_eq!(*log.lock(), vec![1, 2, 1, 2, 1, 2, 1, 2, 1, 2]);
    engine.stop();
}

/// Sleeps a fixed number of rounds, relying on external wakeups to make
/// progress each time.
struct CycleFiber {
    rounds: u32,
    completed: Arc<AtomicU32>,
}

impl Fiber for CycleFiber {
    fn run(&mut self, api: &FiberApi) {
        for _ in 0..self.rounds {
            api.sleep_until_woken();
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Many fibers cycling through sleep/wakeup under several workers, with
/// external wakers hammering `wakeup` the whole time. Wakeups that land
/// between a fiber registering its sleep and actually suspending must not
/// produce duplicate ready entries or extra resumes; the drain still
/// completes with every fiber having run all its rounds.
#[test]
fn concurrent_sleep_wake_stress() {
    let engine = engine(3);
    engine.start();

    let scheduler = FiberScheduler::new();
    scheduler.start(&engine, 3);

    let completed = Arc::new(AtomicU32::new(0));
    let mut ids: Vec<FiberId> = Vec::new();
    for _ in 0..8 {
        ids.push(scheduler.add(Box::new(CycleFiber {
            rounds: 25,
            completed: Arc::clone(&completed),
        })));
    }

    // Wakers spin over every id until the scheduler drains; waking a fiber
    // that is not sleeping is a no-op, so over-waking is harmless.
    let wakers: Vec<_> = (0..2)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            let ids = ids.clone();
            thread::spawn(move || {
                while scheduler.fiber_count() > 0 {
                    for &id in &ids {
                        scheduler.wakeup(id);
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    assert!(scheduler.wait_for_last_exit(true));
    for waker in wakers {
        waker.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert_eq!(scheduler.fiber_count(), 0);
    engine.stop();
}

/// Fibers added before the scheduler starts stay queued until it does.
#[test]
fn fibers_wait_for_scheduler_start() {
    let engine = engine(1);
    engine.start();

    let scheduler = FiberScheduler::new();
    let trace: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    scheduler.add(Box::new(YieldingFiber {
        label: 9,
        yields: 3,
        trace: Arc::clone(&trace),
    }));

    // Never started: the fiber stays queued.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(scheduler.fiber_count(), 1);
    assert!(trace.lock().is_empty());

    scheduler.start(&engine, 1);
    assert!(scheduler.wait_for_last_exit(true));
    assert_eq!(*trace.lock(), vec![9, 9, 9]);
    engine.stop();
}
