//! A plain FIFO dispatcher of runnables over the worker pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::pool::WorkerPool;
use crate::engine::signal::DispatchSignal;
use crate::runnable::Runnable;
use crate::sync::interrupt::WaitSite;

/// Dispatches queued runnables to the worker pool in FIFO order.
///
/// The dispatch thread sleeps until a job is available and hands it to the
/// pool; the pool's blocking admission supplies the "wait for capacity"
/// half of the cycle. Stopping does not drain: queued work is abandoned in
/// place and running work is interrupted.
pub struct JobDispatcher {
    pool: Arc<WorkerPool>,
    queue: Mutex<VecDeque<Arc<dyn Runnable>>>,
    signal: Arc<DispatchSignal>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl JobDispatcher {
    /// Create a dispatcher over the given pool. The dispatcher registers
    /// itself as the pool's completion hook so freed capacity re-enters the
    /// dispatch loop.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            pool,
            queue: Mutex::new(VecDeque::new()),
            signal: Arc::new(DispatchSignal::new()),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let signal_trait_obj: Arc<dyn WaitSite> = dispatcher.signal.clone();
        let hook: std::sync::Weak<dyn WaitSite> = Arc::downgrade(&signal_trait_obj);
        dispatcher.pool.set_completion_hook(hook);
        dispatcher
    }

    /// Append a job to the FIFO.
    pub fn queue(&self, job: Arc<dyn Runnable>) {
        self.queue.lock().push_back(job);
        self.signal.notify();
    }

    /// Number of jobs waiting to be dispatched.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drop all queued jobs without running them.
    pub fn clear_queue(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "cleared queued jobs");
        }
    }

    /// Start the dispatch thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("modest-job-dispatch".into())
            .spawn(move || this.dispatch_loop())
            .expect("failed to spawn dispatch thread");
        *self.thread.lock() = Some(handle);
        debug!("job dispatcher started");
    }

    /// Stop dispatching and interrupt running work. Queued jobs stay in the
    /// queue for a later `start` or `clear_queue`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.signal.notify();
        self.pool.interrupt_running();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        debug!("job dispatcher stopped");
    }

    /// Interrupt and join everything currently running in the pool.
    pub fn terminate_running(&self) {
        self.pool.terminate();
    }

    /// The pool this dispatcher feeds.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    fn dispatch_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            // Sleep until a job is queued and the pool has capacity.
            if !self.pool.has_capacity() {
                self.signal.wait();
                continue;
            }
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    if self.pool.run(job).is_err() {
                        debug!("pool refused job during termination");
                    }
                }
                None => self.signal.wait(),
            }
        }
    }
}
