//! Cooperative per-thread interruption.
//!
//! The engine never preempts: interrupting means raising a flag the target
//! observes at its next convenient point. What makes the flag useful is the
//! *wait-site* protocol below — a thread about to block on a condition
//! variable registers that site on its own handle, so an interrupter can
//! wake exactly the condvar the target sleeps on. Waits that opt in return
//! early; everything else keeps running until it checks the flag.
//!
//! Registration order matters and is what makes wakeups loss-free: the
//! waiter registers the site and re-checks the flag *before* blocking,
//! both while holding the mutex the site's `wake` will take. An
//! interrupter that fires in any interleaving either is seen by that
//! re-check or finds the registered site and notifies under the same
//! mutex.

use std::sync::Arc;

use parking_lot::Mutex;

/// A place a thread may block on, wakeable by an interrupter.
///
/// Implementations lock the mutex their waiters hold around the condition
/// check and `notify_all` the associated condvar.
pub trait WaitSite: Send + Sync {
    /// Wake all waiters blocked on this site.
    fn wake(&self);
}

#[derive(Default)]
struct HandleState {
    interrupted: bool,
    site: Option<Arc<dyn WaitSite>>,
}

/// A shareable cooperative interrupt flag, one per thread.
///
/// Cloning yields another handle to the same flag. The handle for the
/// current thread is obtained with [`InterruptHandle::current`]; the
/// operation layer records it so `Operation::interrupt` can reach the
/// worker executing the runnable.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    state: Arc<Mutex<HandleState>>,
}

thread_local! {
    static CURRENT: InterruptHandle = InterruptHandle::new();
}

impl InterruptHandle {
    /// Create a fresh, un-interrupted handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The interrupt handle of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(Self::clone)
    }

    /// Raise the flag and wake the wait site the owning thread is blocked
    /// on, if any. Idempotent.
    pub fn interrupt(&self) {
        let site = {
            let mut state = self.state.lock();
            state.interrupted = true;
            state.site.clone()
        };
        // Wake outside the handle lock; the site takes its own mutex.
        if let Some(site) = site {
            site.wake();
        }
    }

    /// Whether the flag is raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Lower the flag, e.g. when a pooled worker moves on to its next job.
    pub fn clear(&self) {
        self.state.lock().interrupted = false;
    }

    /// Register the site the owning thread is about to block on.
    ///
    /// Returns whether the flag was already raised; callers must bail out
    /// instead of blocking when it was. Must be called while holding the
    /// mutex that `site.wake()` takes.
    pub fn register_wait_site(&self, site: Arc<dyn WaitSite>) -> bool {
        let mut state = self.state.lock();
        state.site = Some(site);
        state.interrupted
    }

    /// Deregister the current wait site after waking up.
    pub fn clear_wait_site(&self) {
        self.state.lock().site = None;
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
