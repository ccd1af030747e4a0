//! The guard/mutator dispatch protocol.
//!
//! A single dispatch thread walks the operation FIFO under the engine
//! state lock. For each queued operation the guard yields one of three
//! outcomes: *executable* (remove and dispatch), *deferred* (leave in
//! place), or *cancel* (remove, mark canceled, notify waiters). The victim
//! of a cycle has its pre-execution mutation applied inside the same
//! critical section that admitted it, and is handed to the worker pool
//! before the lock is released — nothing can slip past the guard between
//! admission and dispatch.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::engine::pool::WorkerPool;
use crate::engine::signal::DispatchSignal;
use crate::op::Operation;
use crate::runnable::Runnable;
use crate::state::{SharedState, State};
use crate::sync::interrupt::{InterruptHandle, WaitSite};

/// Guard verdict for one queued operation.
enum Admission {
    Execute,
    Defer,
    Cancel,
}

/// Dispatches operations whose guards admit them against the engine state.
pub struct OperationDispatcher {
    state: Arc<SharedState>,
    pool: Arc<WorkerPool>,
    queue: Mutex<VecDeque<Operation>>,
    signal: Arc<DispatchSignal>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl OperationDispatcher {
    /// Create a dispatcher over the given state and pool.
    #[must_use]
    pub fn new(state: Arc<SharedState>, pool: Arc<WorkerPool>) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            state,
            pool,
            queue: Mutex::new(VecDeque::new()),
            signal: Arc::new(DispatchSignal::new()),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        // Completed work frees a slot; that is a reason to re-run the cycle.
        let signal_trait_obj: Arc<dyn WaitSite> = dispatcher.signal.clone();
        let hook: Weak<dyn WaitSite> = Arc::downgrade(&signal_trait_obj);
        dispatcher.pool.set_completion_hook(hook);
        dispatcher
    }

    /// Append an operation to the FIFO and wake the dispatch thread.
    pub fn queue(&self, op: Operation) {
        let signal_trait_obj: Arc<dyn WaitSite> = self.signal.clone();
        let site: Weak<dyn WaitSite> = Arc::downgrade(&signal_trait_obj);
        op.attach_dispatcher(site);
        self.queue.lock().push_back(op);
        self.signal.notify();
    }

    /// Number of operations waiting for admission.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drop all queued operations without canceling them.
    ///
    /// Callers still holding handles observe a forever-pending operation
    /// unless they queue it again; use [`Operation::interrupt`] first when
    /// waiters must be released.
    pub fn clear_queued(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "cleared queued operations");
        }
    }

    /// Signal external state changes made outside any mutator, so deferred
    /// operations are re-evaluated.
    pub fn state_changed(&self) {
        self.signal.notify();
    }

    /// Start the dispatch thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("modest-op-dispatch".into())
            .spawn(move || this.dispatch_loop())
            .expect("failed to spawn dispatch thread");
        *self.thread.lock() = Some(handle);
        debug!("operation dispatcher started");
    }

    /// Stop the dispatch thread and join it.
    ///
    /// Queued operations are untouched; they run on a subsequent
    /// [`start`](Self::start) or are dropped by
    /// [`clear_queued`](Self::clear_queued).
    pub fn stop(&self) {
        self.request_stop();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        debug!("operation dispatcher stopped");
    }

    /// Flip the run flag and wake the dispatch thread without joining.
    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.signal.notify();
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
            // C2's contract: sleep until work is queued *and* the pool has
            // capacity. Checking capacity out here keeps the in-section
            // pool submission from blocking against a worker that needs
            // the state lock for its post-execution mutation.
            if !self.pool.has_capacity() || !self.dispatch_next() {
                self.signal.wait();
            }
        }
    }

    /// Run one dispatch cycle. Returns whether an operation was dispatched.
    fn dispatch_next(&self) -> bool {
        let mut state = self.state.lock();

        let victim = {
            let mut queue = self.queue.lock();
            let mut victim = None;
            let mut index = 0;
            while index < queue.len() {
                let verdict = check_admission(&queue[index], &state);
                match verdict {
                    Admission::Execute => {
                        victim = queue.remove(index);
                        break;
                    }
                    Admission::Defer => index += 1,
                    Admission::Cancel => {
                        if let Some(op) = queue.remove(index) {
                            trace!(op = op.runnable().name(), "operation canceled at admission");
                            op.cancel();
                        }
                    }
                }
            }
            victim
        };

        let Some(op) = victim else {
            return false;
        };

        // The one window where an operation alters state atomically with
        // its own admission. Never rolled back: the operation is committed.
        if let Some(mutator) = op.mutator() {
            mutator.pre_execute(&mut state, &op);
        }

        let executor = Arc::new(OperationExecutor {
            op: op.clone(),
            state: Arc::clone(&self.state),
            signal: Arc::clone(&self.signal),
        });
        // Submitted while the state lock is still held: no other operation
        // can be admitted until this one has actually been handed off.
        if self.pool.run(executor).is_err() {
            warn!(op = op.runnable().name(), "pool terminated during dispatch");
            op.cancel();
        }
        true
    }
}

/// Evaluate one queued operation against the current state.
fn check_admission(op: &Operation, state: &State) -> Admission {
    if op.interrupted() && !op.started() {
        return Admission::Cancel;
    }
    match op.guard() {
        None => Admission::Execute,
        Some(guard) => {
            if guard.can_execute(state, op) {
                Admission::Execute
            } else if guard.must_cancel(state, op) {
                Admission::Cancel
            } else {
                Admission::Defer
            }
        }
    }
}

/// Worker-side wrapper: runs the operation's runnable and drives its
/// terminal transition, post-execution mutation and completion broadcast.
struct OperationExecutor {
    op: Operation,
    state: Arc<SharedState>,
    signal: Arc<DispatchSignal>,
}

impl Runnable for OperationExecutor {
    fn run(&self) {
        let thread = InterruptHandle::current();
        if self.op.interrupted() {
            // An interrupt landed between dispatch and pickup; make sure
            // the runnable's interruptible waits observe it.
            thread.interrupt();
        }
        self.op.record_thread(thread.clone());
        self.op.mark_started();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.op.runnable().run()));
        if outcome.is_err() {
            // Failures are absorbed; the operation still terminates.
            error!(op = self.op.runnable().name(), "operation runnable panicked");
        }

        self.op.clear_thread();
        let canceled = self.op.interrupted();
        self.op.set_terminal(canceled);

        if let Some(mutator) = self.op.mutator() {
            if mutator.wants_post_execute() {
                let mut state = self.state.lock();
                mutator.post_execute(&mut state, &self.op);
            }
        }

        self.op.broadcast_completion();
        // State may have changed; deferred operations get another look.
        self.signal.notify();
    }

    fn interrupt(&self) {
        self.op.interrupt();
    }

    fn name(&self) -> &str {
        self.op.runnable().name()
    }
}
