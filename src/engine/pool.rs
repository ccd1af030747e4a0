//! Worker pool with bounded, reusable, idle-expiring OS threads.
//!
//! Workers pull jobs from a shared crossbeam channel; an idle worker whose
//! expiration elapses terminates itself and is reaped lazily on the next
//! submission. Admission is a counting gate: [`WorkerPool::run`] blocks the
//! caller while the pool is at capacity and wakes when a worker frees up —
//! the back-pressure the operation dispatcher relies on.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::runnable::Runnable;
use crate::sync::interrupt::{InterruptHandle, WaitSite};

type Job = Arc<dyn Runnable>;

/// Admission gate: how many jobs are in flight against the current size.
struct Admission {
    in_flight: usize,
    size: usize,
    terminated: bool,
    next_worker_id: u64,
}

/// The job channel; replaced wholesale when the pool is terminated so a
/// terminated pool can be reused.
struct Channel {
    tx: Option<Sender<Job>>,
    rx: Receiver<Job>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx: Some(tx), rx }
    }
}

/// Counters for pool diagnostics (lock-free atomics).
#[derive(Default)]
struct PoolCounters {
    jobs_run: AtomicU64,
    workers_spawned: AtomicU64,
    workers_expired: AtomicU64,
}

/// Snapshot of pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Configured pool size.
    pub size: usize,
    /// Jobs currently admitted (running or being handed off).
    pub in_flight: usize,
    /// Live worker threads.
    pub live_workers: usize,
    /// Jobs executed over the pool's lifetime.
    pub jobs_run: u64,
    /// Worker threads ever spawned.
    pub workers_spawned: u64,
    /// Worker threads that exited on idle expiration.
    pub workers_expired: u64,
}

/// State shared between the pool handle and its worker threads.
struct PoolShared {
    admission: Mutex<Admission>,
    free: Condvar,
    running: Mutex<HashMap<u64, Job>>,
    live: AtomicUsize,
    counters: PoolCounters,
    idle_expiration: Option<Duration>,
    completion_hook: Mutex<Option<std::sync::Weak<dyn WaitSite>>>,
}

/// A bounded set of reusable worker threads.
///
/// Operations exposed: [`run`](Self::run) (blocks while at capacity),
/// [`set_size`](Self::set_size)/[`size`](Self::size),
/// [`interrupt_running`](Self::interrupt_running) and
/// [`terminate`](Self::terminate) (interrupt + join every worker). Worker
/// threads are named `modest-worker-N`; the job's
/// [`name`](crate::runnable::Runnable::name) appears in log fields.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    channel: Mutex<Channel>,
    workers: Mutex<Vec<(u64, JoinHandle<()>)>>,
    stack_size: usize,
}

impl WorkerPool {
    /// Create a pool from configuration. No threads are spawned until work
    /// arrives.
    #[must_use]
    pub fn new(config: &PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(PoolShared {
                admission: Mutex::new(Admission {
                    in_flight: 0,
                    size: config.size,
                    terminated: false,
                    next_worker_id: 0,
                }),
                free: Condvar::new(),
                running: Mutex::new(HashMap::new()),
                live: AtomicUsize::new(0),
                counters: PoolCounters::default(),
                idle_expiration: config.idle_expiration(),
                completion_hook: Mutex::new(None),
            }),
            channel: Mutex::new(Channel::new()),
            workers: Mutex::new(Vec::new()),
            stack_size: config.thread_stack_size,
        })
    }

    /// The configured pool size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.admission.lock().size
    }

    /// Change the pool size. Growing wakes blocked submitters; shrinking
    /// lets surplus workers drain out through idle expiration.
    pub fn set_size(&self, size: usize) {
        let mut admission = self.shared.admission.lock();
        let grew = size > admission.size;
        admission.size = size;
        drop(admission);
        if grew {
            self.shared.free.notify_all();
        }
    }

    /// Submit a job, blocking while the pool is at capacity.
    ///
    /// Returns once a worker slot has been claimed and the job handed off.
    /// This blocking is deliberate: a caller holding an admission-critical
    /// lock is not overtaken while the pool is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Terminated`] if the pool is being terminated.
    pub fn run(&self, job: Job) -> Result<(), PoolError> {
        {
            let mut admission = self.shared.admission.lock();
            while !admission.terminated && admission.in_flight >= admission.size {
                self.shared.free.wait(&mut admission);
            }
            if admission.terminated {
                return Err(PoolError::Terminated);
            }
            admission.in_flight += 1;
        }
        self.ensure_worker();
        let sent = {
            let channel = self.channel.lock();
            match channel.tx.as_ref() {
                Some(tx) => tx.send(job).is_ok(),
                None => false,
            }
        };
        if sent {
            Ok(())
        } else {
            // Terminated between admission and handoff; give the slot back.
            let mut admission = self.shared.admission.lock();
            admission.in_flight = admission.in_flight.saturating_sub(1);
            Err(PoolError::Terminated)
        }
    }

    /// Register a site to wake each time a worker slot frees up. The
    /// operation dispatcher uses this to re-enter its cycle once capacity
    /// is available again.
    pub fn set_completion_hook(&self, hook: std::sync::Weak<dyn WaitSite>) {
        *self.shared.completion_hook.lock() = Some(hook);
    }

    /// Whether a submission right now would not block.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        let admission = self.shared.admission.lock();
        !admission.terminated && admission.in_flight < admission.size
    }

    /// Invoke the cooperative interrupt hook of every running job.
    pub fn interrupt_running(&self) {
        let running: Vec<Job> = self.shared.running.lock().values().cloned().collect();
        for job in running {
            job.interrupt();
        }
    }

    /// Interrupt all running jobs and join every worker thread.
    ///
    /// Blocked submitters return [`PoolError::Terminated`]. Workers that do
    /// not exit within a grace period are detached with a warning. The pool
    /// is reusable afterwards: a fresh job channel is installed and new
    /// workers spawn on demand.
    pub fn terminate(&self) {
        {
            let mut admission = self.shared.admission.lock();
            if admission.terminated {
                return;
            }
            admission.terminated = true;
            self.shared.free.notify_all();
        }

        // Close the channel so idle workers drain out, then interrupt the busy ones.
        {
            let mut channel = self.channel.lock();
            channel.tx = None;
        }
        self.interrupt_running();

        let workers = std::mem::take(&mut *self.workers.lock());
        for (worker_id, handle) in workers {
            // Join with a grace period; a job that never observes its
            // interrupt must not hang the caller.
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let outcome = handle.join();
                let _ = tx.send(outcome.is_ok());
            });
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id, "worker joined"),
                Ok(false) => warn!(worker_id, "worker panicked"),
                Err(_) => warn!(worker_id, "worker did not exit in time, detaching"),
            }
            let _ = joiner.join();
        }

        // Reset for reuse.
        let mut admission = self.shared.admission.lock();
        admission.in_flight = 0;
        admission.terminated = false;
        *self.channel.lock() = Channel::new();
        debug!("worker pool terminated and reset");
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let admission = self.shared.admission.lock();
        PoolStats {
            size: admission.size,
            in_flight: admission.in_flight,
            live_workers: self.shared.live.load(Ordering::Relaxed),
            jobs_run: self.shared.counters.jobs_run.load(Ordering::Relaxed),
            workers_spawned: self.shared.counters.workers_spawned.load(Ordering::Relaxed),
            workers_expired: self.shared.counters.workers_expired.load(Ordering::Relaxed),
        }
    }

    /// Reap exited workers and spawn a new one if in-flight work exceeds
    /// the live worker count.
    fn ensure_worker(&self) {
        let mut workers = self.workers.lock();
        let mut i = 0;
        while i < workers.len() {
            if workers[i].1.is_finished() {
                let (worker_id, handle) = workers.swap_remove(i);
                let _ = handle.join();
                debug!(worker_id, "reaped expired worker");
            } else {
                i += 1;
            }
        }

        let (needs_worker, worker_id) = {
            let mut admission = self.shared.admission.lock();
            let live = self.shared.live.load(Ordering::Relaxed);
            if live < admission.in_flight {
                let id = admission.next_worker_id;
                admission.next_worker_id += 1;
                (true, id)
            } else {
                (false, 0)
            }
        };
        if !needs_worker {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let rx = self.channel.lock().rx.clone();
        self.shared.live.fetch_add(1, Ordering::Relaxed);
        self.shared.counters.workers_spawned.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("modest-worker-{worker_id}"))
            .stack_size(self.stack_size)
            .spawn(move || worker_loop(&shared, worker_id, &rx))
            .expect("failed to spawn worker thread");
        workers.push((worker_id, handle));
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close the channel so workers drain out, but do not join here;
        // explicit terminate() is the graceful path.
        let mut channel = self.channel.lock();
        channel.tx = None;
    }
}

/// The body of one worker thread.
fn worker_loop(shared: &Arc<PoolShared>, worker_id: u64, rx: &Receiver<Job>) {
    debug!(worker_id, "worker thread started");
    loop {
        let job = match shared.idle_expiration {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => {
                    if try_expire(shared) {
                        shared.counters.workers_expired.fetch_add(1, Ordering::Relaxed);
                        debug!(worker_id, "idle expiration reached, worker exiting");
                        return;
                    }
                    // Pending work may still be headed our way; keep idling.
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        shared.running.lock().insert(worker_id, Arc::clone(&job));
        debug!(worker_id, job = job.name(), "worker executing job");
        let outcome = catch_unwind(AssertUnwindSafe(|| job.run()));
        if outcome.is_err() {
            error!(worker_id, job = job.name(), "job panicked; worker continues");
        }
        shared.running.lock().remove(&worker_id);
        InterruptHandle::current().clear();
        shared.counters.jobs_run.fetch_add(1, Ordering::Relaxed);

        let mut admission = shared.admission.lock();
        admission.in_flight = admission.in_flight.saturating_sub(1);
        drop(admission);
        shared.free.notify_one();
        let hook = shared.completion_hook.lock().clone();
        if let Some(site) = hook.and_then(|w| w.upgrade()) {
            site.wake();
        }
    }
    shared.live.fetch_sub(1, Ordering::Relaxed);
    debug!(worker_id, "worker thread exiting");
}

/// Decide, consistently with the admission gate, whether this worker may
/// exit: only when the remaining workers cover all in-flight work.
fn try_expire(shared: &Arc<PoolShared>) -> bool {
    let admission = shared.admission.lock();
    let live = shared.live.load(Ordering::Relaxed);
    if live.saturating_sub(1) >= admission.in_flight {
        // Decrement under the admission lock so submitters never observe a
        // stale live count when deciding to spawn.
        shared.live.fetch_sub(1, Ordering::Relaxed);
        true
    } else {
        false
    }
}
