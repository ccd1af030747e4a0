//! The M:N fiber scheduler.
//!
//! N worker operations, queued into an [`OperationRunner`], all execute
//! [`FiberScheduler::run_worker`]: each repeatedly takes the next fiber
//! from a shared FIFO ready queue, switches into it until it suspends, and
//! files the outcome. One `schedule_lock` guards every scheduler table;
//! context switches themselves happen outside it, so user fiber code never
//! runs under a scheduler lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::engine::OperationRunner;
use crate::fiber::context::FiberContext;
use crate::fiber::{Fiber, FiberId, FiberState};
use crate::op::{Operation, OperationList};
use crate::runnable::Runnable;
use crate::sync::interrupt::{InterruptHandle, WaitSite};

/// One fiber's entry in the scheduler: identity, lifecycle state, context
/// and (until first run) the fiber body awaiting its backing thread.
struct FiberSlot {
    id: FiberId,
    state: Mutex<FiberState>,
    ctx: FiberContext,
    body: Mutex<Option<Box<dyn Fiber>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    /// Set by the fiber right before a plain yield; consumed by the worker
    /// that drove the switch. Distinguishes "yielded, requeue it" from
    /// "slept and was already re-enqueued by an external wakeup".
    yielded: AtomicBool,
}

impl FiberSlot {
    fn new(id: FiberId, body: Box<dyn Fiber>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(FiberState::New),
            ctx: FiberContext::new(),
            body: Mutex::new(Some(body)),
            thread: Mutex::new(None),
            yielded: AtomicBool::new(false),
        })
    }

    fn state(&self) -> FiberState {
        *self.state.lock()
    }

    fn set_state(&self, state: FiberState) {
        *self.state.lock() = state;
    }

    fn set_yield_flag(&self) {
        self.yielded.store(true, Ordering::Release);
    }

    fn take_yield_flag(&self) -> bool {
        self.yielded.swap(false, Ordering::AcqRel)
    }
}

/// Scheduler tables, all guarded by the one schedule lock.
struct Tables {
    fiber_map: HashMap<FiberId, Arc<FiberSlot>>,
    ready: VecDeque<FiberId>,
    /// Mirror of `ready` membership so a fiber is enqueued at most once.
    enqueued: HashSet<FiberId>,
    sleeping: HashMap<FiberId, Arc<FiberSlot>>,
    next_id: FiberId,
    check_map: bool,
    stopped: bool,
}

impl Tables {
    fn push_ready(&mut self, id: FiberId) -> bool {
        if self.enqueued.insert(id) {
            self.ready.push_back(id);
            true
        } else {
            false
        }
    }
}

/// Schedules and runs fibers over N operations of the layer below.
///
/// Start it with [`start`](Self::start), hand it fibers with
/// [`add`](Self::add), and drain it with
/// [`wait_for_last_exit`](Self::wait_for_last_exit). Stopping does not
/// make fibers exit; they simply no longer run until the next `start`.
///
/// Dropping a scheduler that still holds suspended fibers leaks their
/// parked backing threads; drain before dropping.
pub struct FiberScheduler {
    self_ref: Weak<FiberScheduler>,
    tables: Mutex<Tables>,
    fiber_available: Condvar,
    no_fibers: Condvar,
    worker_ops: OperationList,
}

impl FiberScheduler {
    /// Create a scheduler with no fibers and no workers.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            tables: Mutex::new(Tables {
                fiber_map: HashMap::new(),
                ready: VecDeque::new(),
                enqueued: HashSet::new(),
                sleeping: HashMap::new(),
                next_id: 1,
                check_map: false,
                stopped: false,
            }),
            fiber_available: Condvar::new(),
            no_fibers: Condvar::new(),
            worker_ops: OperationList::new(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("scheduler is alive while borrowed")
    }

    /// Queue `num_workers` worker operations into `runner` to run fibers.
    pub fn start(&self, runner: &dyn OperationRunner, num_workers: usize) {
        self.tables.lock().stopped = false;
        for _ in 0..num_workers {
            let op = Operation::new(FiberWorker { scheduler: self.arc() });
            self.worker_ops.add(op.clone());
            runner.run_operation(op);
        }
        debug!(num_workers, "fiber scheduler started");
    }

    /// Stop running fibers. Workers exit once their current fiber suspends;
    /// fibers and their states are retained for a later `start`.
    pub fn stop(&self) {
        {
            let mut tables = self.tables.lock();
            if tables.stopped {
                return;
            }
            tables.stopped = true;
        }
        self.fiber_available.notify_all();
        self.worker_ops.terminate();
        debug!("fiber scheduler stopped");
    }

    /// Add a fiber; it becomes runnable immediately. Returns its id.
    pub fn add(&self, fiber: Box<dyn Fiber>) -> FiberId {
        let id = {
            let mut tables = self.tables.lock();
            let id = allocate_id(&mut tables);
            let slot = FiberSlot::new(id, fiber);
            tables.fiber_map.insert(id, Arc::clone(&slot));
            tables.push_ready(id);
            id
        };
        self.fiber_available.notify_one();
        trace!(fiber = id, "fiber added");
        id
    }

    /// Number of live (not yet dead) fibers.
    #[must_use]
    pub fn fiber_count(&self) -> usize {
        self.tables.lock().fiber_map.len()
    }

    /// Wake a sleeping fiber. Unknown or non-sleeping ids are a no-op.
    pub fn wakeup(&self, id: FiberId) {
        let woke = {
            let mut tables = self.tables.lock();
            match tables.sleeping.remove(&id) {
                Some(slot) => {
                    slot.set_state(FiberState::Running);
                    tables.push_ready(id);
                    true
                }
                None => false,
            }
        };
        if woke {
            self.fiber_available.notify_one();
            trace!(fiber = id, "fiber woken");
        }
    }

    /// Block until every fiber has exited.
    ///
    /// With `stop_after` set the scheduler is stopped once the drain
    /// completes. Returns `true` on a complete drain, `false` when the
    /// calling thread was interrupted first.
    pub fn wait_for_last_exit(&self, stop_after: bool) -> bool {
        let me = InterruptHandle::current();
        let site: Arc<dyn WaitSite> = self.arc();
        {
            let mut tables = self.tables.lock();
            while !tables.fiber_map.is_empty() {
                if me.register_wait_site(Arc::clone(&site)) {
                    me.clear_wait_site();
                    return false;
                }
                self.no_fibers.wait(&mut tables);
                me.clear_wait_site();
                if me.is_interrupted() {
                    return false;
                }
            }
        }
        if stop_after {
            self.stop();
        }
        true
    }

    /// The worker loop, executed inside each worker operation.
    pub(crate) fn run_worker(&self) {
        let this = self.arc();
        let me = InterruptHandle::current();
        loop {
            let slot = {
                let mut tables = self.tables.lock();
                loop {
                    if tables.stopped || me.is_interrupted() {
                        return;
                    }
                    if let Some(slot) = next_ready(&mut tables) {
                        break slot;
                    }
                    self.fiber_available.wait(&mut tables);
                }
            };

            match slot.state() {
                FiberState::Exited => {
                    // Finalization owed from a previous pass.
                    self.finalize(&slot);
                    continue;
                }
                FiberState::New => slot.set_state(FiberState::Running),
                _ => {}
            }

            // The switch happens outside the schedule lock.
            self.resume_slot(&this, &slot);

            // Decide-and-enqueue under the schedule lock, atomic with the
            // table mutations of sleep_slot and wakeup.
            let (requeue, exited) = {
                let mut tables = self.tables.lock();
                if slot.take_yield_flag() {
                    // It yielded: back to the tail, FIFO fairness.
                    (tables.push_ready(slot.id), false)
                } else {
                    match slot.state() {
                        FiberState::Exited => (false, true),
                        // Sleeping: parked in the sleeping table. Running
                        // without a yield: an external wakeup got in first
                        // and has already re-enqueued it.
                        _ => (false, false),
                    }
                }
            };
            if requeue {
                self.fiber_available.notify_one();
            }
            if exited {
                self.finalize(&slot);
            }
        }
    }

    /// Switch into the fiber until it suspends, lazily spawning its backing
    /// thread on first resume.
    fn resume_slot(&self, this: &Arc<Self>, slot: &Arc<FiberSlot>) {
        {
            let mut thread_slot = slot.thread.lock();
            if thread_slot.is_none() && !slot.ctx.is_finished() {
                if let Some(body) = slot.body.lock().take() {
                    let api = FiberApi {
                        scheduler: Arc::clone(this),
                        slot: Arc::clone(slot),
                    };
                    let cell = Arc::clone(slot);
                    let handle = thread::Builder::new()
                        .name(format!("modest-fiber-{}", slot.id))
                        .spawn(move || {
                            cell.ctx.wait_first_resume();
                            let mut body = body;
                            body.run(&api);
                            body.exited();
                            cell.set_state(FiberState::Exited);
                            cell.ctx.finish();
                        })
                        .expect("failed to spawn fiber thread");
                    *thread_slot = Some(handle);
                }
            }
        }
        slot.ctx.resume();
    }

    /// Retire an exited fiber: drop it from every table and signal the
    /// drain condition when it was the last one.
    fn finalize(&self, slot: &Arc<FiberSlot>) {
        if let Some(handle) = slot.thread.lock().take() {
            let _ = handle.join();
        }
        let mut tables = self.tables.lock();
        if tables.fiber_map.remove(&slot.id).is_none() {
            return;
        }
        tables.sleeping.remove(&slot.id);
        tables.enqueued.remove(&slot.id);
        slot.set_state(FiberState::Dead);
        let drained = tables.fiber_map.is_empty();
        drop(tables);
        trace!(fiber = slot.id, "fiber dead");
        if drained {
            self.no_fibers.notify_all();
        }
    }

    /// Move the calling fiber from ready tracking into the sleeping table,
    /// then suspend it.
    fn sleep_slot(&self, slot: &Arc<FiberSlot>) {
        {
            let mut tables = self.tables.lock();
            slot.set_state(FiberState::Sleeping);
            tables.sleeping.insert(slot.id, Arc::clone(slot));
        }
        slot.ctx.suspend();
    }

    /// Mark the calling fiber runnable again; idempotent with `sleep`.
    fn wakeup_self_slot(&self, slot: &Arc<FiberSlot>) {
        let mut tables = self.tables.lock();
        tables.sleeping.remove(&slot.id);
        slot.set_state(FiberState::Running);
    }
}

impl WaitSite for FiberScheduler {
    fn wake(&self) {
        let _tables = self.tables.lock();
        self.no_fibers.notify_all();
    }
}

/// Allocate the next fiber id, probing the directory once the counter has
/// wrapped.
fn allocate_id(tables: &mut Tables) -> FiberId {
    loop {
        let id = tables.next_id;
        tables.next_id = match tables.next_id.checked_add(1) {
            Some(next) => next,
            None => {
                tables.check_map = true;
                1
            }
        };
        if !tables.check_map || !tables.fiber_map.contains_key(&id) {
            return id;
        }
    }
}

/// Pop the next dispatchable fiber, skipping sleepers and dead entries.
fn next_ready(tables: &mut Tables) -> Option<Arc<FiberSlot>> {
    while let Some(id) = tables.ready.pop_front() {
        tables.enqueued.remove(&id);
        if let Some(slot) = tables.fiber_map.get(&id) {
            match slot.state() {
                // A sleeper re-enters through wakeup; drop the stale entry.
                FiberState::Sleeping | FiberState::Dead => {}
                _ => return Some(Arc::clone(slot)),
            }
        }
    }
    None
}

/// The runnable driving one worker operation.
struct FiberWorker {
    scheduler: Arc<FiberScheduler>,
}

impl Runnable for FiberWorker {
    fn run(&self) {
        self.scheduler.run_worker();
    }

    fn interrupt(&self) {
        // Wake idle workers so they observe the interrupt and exit.
        self.scheduler.fiber_available.notify_all();
    }

    fn name(&self) -> &str {
        "fiber-worker"
    }
}

/// Handle to the scheduler for use *inside* a fiber body.
///
/// Not clonable and only ever lent to [`Fiber::run`], so suspension points
/// cannot leak outside the fiber.
pub struct FiberApi {
    scheduler: Arc<FiberScheduler>,
    slot: Arc<FiberSlot>,
}

impl FiberApi {
    /// The running fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.slot.id
    }

    /// The scheduler running this fiber.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<FiberScheduler> {
        &self.scheduler
    }

    /// Return control to the scheduler; the fiber stays runnable and
    /// resumes in FIFO turn.
    pub fn yield_now(&self) {
        self.slot.set_yield_flag();
        self.slot.ctx.suspend();
    }

    /// Park this fiber until an external [`FiberScheduler::wakeup`].
    ///
    /// Follow the resumption with [`wakeup_self`](Self::wakeup_self), or
    /// use [`sleep_until_woken`](Self::sleep_until_woken) which fuses the
    /// two.
    pub fn sleep(&self) {
        self.scheduler.sleep_slot(&self.slot);
    }

    /// Reassert that this fiber is runnable after a sleep.
    pub fn wakeup_self(&self) {
        self.scheduler.wakeup_self_slot(&self.slot);
    }

    /// Park until woken, then mark the fiber runnable again.
    pub fn sleep_until_woken(&self) {
        self.sleep();
        self.wakeup_self();
    }
}
