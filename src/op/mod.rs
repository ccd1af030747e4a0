//! Operations: guarded, schedulable units of work.
//!
//! An [`Operation`] bundles a [`Runnable`] with an optional admission
//! [`OperationGuard`], an optional [`StateMutator`] and a set of monotonic
//! status flags. Handles are cheap to clone; the queue, the executing
//! worker and any number of waiters share the same underlying operation.

mod guard;
mod list;
mod mutator;

pub use guard::{GuardFn, OperationGuard};
pub use list::OperationList;
pub use mutator::{MutatorFn, StateMutator};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::runnable::Runnable;
use crate::sync::interrupt::{InterruptHandle, WaitSite};

/// Completion monitor plus published status flags.
///
/// Flags are atomics whose transitions are stored before the broadcast that
/// notifies waiters; waiters re-check them under the monitor lock, so a
/// terminal transition is never missed.
#[derive(Default)]
struct OpShared {
    started: AtomicBool,
    interrupted: AtomicBool,
    stopped: AtomicBool,
    finished: AtomicBool,
    canceled: AtomicBool,
    monitor: Mutex<()>,
    cond: Condvar,
    links: Mutex<OpLinks>,
}

/// Mutable associations: the executing worker thread and, once queued, the
/// dispatcher to poke when this operation's disposition changes.
#[derive(Default)]
struct OpLinks {
    thread: Option<InterruptHandle>,
    dispatcher: Option<Weak<dyn WaitSite>>,
}

impl OpShared {
    fn is_terminal(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.canceled.load(Ordering::Acquire)
    }

    fn broadcast(&self) {
        let _guard = self.monitor.lock();
        self.cond.notify_all();
    }
}

impl WaitSite for OpShared {
    fn wake(&self) {
        self.broadcast();
    }
}

struct OpInner {
    runnable: Arc<dyn Runnable>,
    guard: Option<Arc<dyn OperationGuard>>,
    mutator: Option<Arc<dyn StateMutator>>,
    shared: Arc<OpShared>,
}

/// A queueable unit of work with admission guard and state mutation hooks.
///
/// Status flags are monotonic booleans. A queued operation reaches exactly
/// one terminal state: `finished` (its runnable ran to completion) or
/// `canceled` (its guard demanded cancellation, it was interrupted before
/// it started, or it was interrupted while running and returned early).
///
/// # Example
///
/// ```
/// use modest_engine::{Operation, RunnableFn};
///
/// let op = Operation::new(RunnableFn::new("noop", || {}));
/// assert!(!op.started());
/// assert!(!op.finished() && !op.canceled());
/// ```
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OpInner>,
}

impl Operation {
    /// Create an operation around a runnable, with no guard or mutator.
    pub fn new(runnable: impl Runnable) -> Self {
        Self::from_arc(Arc::new(runnable))
    }

    /// Create an operation around an already-shared runnable.
    pub fn from_arc(runnable: Arc<dyn Runnable>) -> Self {
        Self {
            inner: Arc::new(OpInner {
                runnable,
                guard: None,
                mutator: None,
                shared: Arc::new(OpShared::default()),
            }),
        }
    }

    /// Attach an admission guard.
    ///
    /// # Panics
    ///
    /// Panics if the operation handle has already been cloned; guards are
    /// fixed at construction time.
    #[must_use]
    pub fn with_guard(mut self, guard: impl OperationGuard) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_guard must be called before the operation is shared");
        inner.guard = Some(Arc::new(guard));
        self
    }

    /// Attach a state mutator.
    ///
    /// # Panics
    ///
    /// Panics if the operation handle has already been cloned; mutators are
    /// fixed at construction time.
    #[must_use]
    pub fn with_mutator(mut self, mutator: impl StateMutator) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_mutator must be called before the operation is shared");
        inner.mutator = Some(Arc::new(mutator));
        self
    }

    /// Interrupt this operation. Idempotent.
    ///
    /// Raises the `interrupted` flag, invokes the runnable's cooperative
    /// interrupt hook, pokes the worker thread currently executing the
    /// runnable (if any) so interruptible waits inside it return early, and
    /// wakes the dispatcher so a queued, not-yet-started operation is
    /// canceled on the next cycle.
    pub fn interrupt(&self) {
        self.inner.shared.interrupted.store(true, Ordering::Release);
        self.inner.runnable.interrupt();
        let (thread, dispatcher) = {
            let links = self.inner.shared.links.lock();
            (links.thread.clone(), links.dispatcher.clone())
        };
        if let Some(thread) = thread {
            thread.interrupt();
        }
        if let Some(site) = dispatcher.and_then(|w| w.upgrade()) {
            site.wake();
        }
    }

    /// Block until this operation is finished or canceled.
    ///
    /// Returns `true` once the operation reached a terminal state. With
    /// `interruptible` set, returns `false` as soon as the *calling* thread
    /// is interrupted; the awaited operation is unaffected either way.
    pub fn wait_for(&self, interruptible: bool) -> bool {
        let shared = &self.inner.shared;
        let me = InterruptHandle::current();
        let mut guard = shared.monitor.lock();
        loop {
            if shared.is_terminal() {
                return true;
            }
            if interruptible {
                let site: Arc<dyn WaitSite> = shared.clone();
                if me.register_wait_site(site) {
                    me.clear_wait_site();
                    return false;
                }
            }
            shared.cond.wait(&mut guard);
            if interruptible {
                me.clear_wait_site();
            }
            // Loop: completion wins over interruption when both raced; the
            // re-registration pass reports a pending interrupt otherwise.
        }
    }

    /// Whether execution of the runnable has begun.
    #[must_use]
    pub fn started(&self) -> bool {
        self.inner.shared.started.load(Ordering::Acquire)
    }

    /// Whether the operation has been interrupted.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.inner.shared.interrupted.load(Ordering::Acquire)
    }

    /// Whether the operation will never run (again): terminal either way.
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.inner.shared.stopped.load(Ordering::Acquire)
    }

    /// Whether the runnable ran to completion.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.inner.shared.finished.load(Ordering::Acquire)
    }

    /// Whether the operation was canceled before or instead of completing.
    #[must_use]
    pub fn canceled(&self) -> bool {
        self.inner.shared.canceled.load(Ordering::Acquire)
    }

    /// The runnable this operation executes.
    #[must_use]
    pub fn runnable(&self) -> &Arc<dyn Runnable> {
        &self.inner.runnable
    }

    /// The admission guard, if any.
    #[must_use]
    pub fn guard(&self) -> Option<&Arc<dyn OperationGuard>> {
        self.inner.guard.as_ref()
    }

    /// The state mutator, if any.
    #[must_use]
    pub fn mutator(&self) -> Option<&Arc<dyn StateMutator>> {
        self.inner.mutator.as_ref()
    }

    /// Record the dispatcher to wake when this operation is interrupted
    /// while still queued.
    pub(crate) fn attach_dispatcher(&self, site: Weak<dyn WaitSite>) {
        self.inner.shared.links.lock().dispatcher = Some(site);
    }

    /// Record the worker thread about to execute the runnable.
    pub(crate) fn record_thread(&self, handle: InterruptHandle) {
        self.inner.shared.links.lock().thread = Some(handle);
    }

    /// Forget the executing worker thread.
    pub(crate) fn clear_thread(&self) {
        self.inner.shared.links.lock().thread = None;
    }

    /// Mark execution as begun.
    pub(crate) fn mark_started(&self) {
        self.inner.shared.started.store(true, Ordering::Release);
    }

    /// Publish the terminal flags without waking waiters yet; the worker
    /// broadcasts after any post-execution mutation has run.
    pub(crate) fn set_terminal(&self, canceled: bool) {
        let shared = &self.inner.shared;
        shared.stopped.store(true, Ordering::Release);
        if canceled {
            shared.canceled.store(true, Ordering::Release);
        } else {
            shared.finished.store(true, Ordering::Release);
        }
    }

    /// Wake all waiters blocked in [`wait_for`](Self::wait_for).
    pub(crate) fn broadcast_completion(&self) {
        self.inner.shared.broadcast();
    }

    /// Cancel a never-started operation: terminal flags plus broadcast.
    pub(crate) fn cancel(&self) {
        self.set_terminal(true);
        self.broadcast_completion();
    }

    /// Whether two handles refer to the same operation.
    #[must_use]
    pub fn same_as(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("runnable", &self.inner.runnable.name())
            .field("started", &self.started())
            .field("interrupted", &self.interrupted())
            .field("finished", &self.finished())
            .field("canceled", &self.canceled())
            .finish()
    }
}
