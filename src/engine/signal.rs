//! Wake primitive for dispatcher threads.

use parking_lot::{Condvar, Mutex};

use crate::sync::interrupt::WaitSite;

/// A latched wakeup: `notify` raises a dirty bit, `wait` sleeps until it is
/// raised and consumes it. Raising before anyone waits is never lost.
#[derive(Default)]
pub(crate) struct DispatchSignal {
    dirty: Mutex<bool>,
    cv: Condvar,
}

impl DispatchSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raise the signal: a job was queued, state may have changed, or the
    /// dispatcher should re-examine its run flag.
    pub(crate) fn notify(&self) {
        let mut dirty = self.dirty.lock();
        *dirty = true;
        self.cv.notify_all();
    }

    /// Sleep until the signal is raised, then consume it.
    pub(crate) fn wait(&self) {
        let mut dirty = self.dirty.lock();
        while !*dirty {
            self.cv.wait(&mut dirty);
        }
        *dirty = false;
    }
}

impl WaitSite for DispatchSignal {
    fn wake(&self) {
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_before_wait_is_not_lost() {
        let s = DispatchSignal::new();
        s.notify();
        s.wait();
    }

    #[test]
    fn wait_blocks_until_notified() {
        let s = Arc::new(DispatchSignal::new());
        let s2 = Arc::clone(&s);
        let waiter = thread::spawn(move || s2.wait());
        thread::sleep(Duration::from_millis(20));
        s.notify();
        waiter.join().unwrap();
    }
}
