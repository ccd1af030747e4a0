//! Cooperative context switching on a dedicated parked thread.
//!
//! Each fiber's execution context is an OS thread that spends its life
//! parked except while the fiber owns the turn. `resume` hands the turn to
//! the fiber and blocks the calling scheduler worker until the fiber gives
//! it back (`suspend`) or finishes for good (`finish`). A switch lock
//! serializes resumers: a worker that popped a freshly woken fiber waits
//! until the previous switch has fully unwound before starting its own.

use parking_lot::{Condvar, Mutex};

/// Whose turn it is to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Scheduler,
    Fiber,
}

struct Gate {
    turn: Turn,
    finished: bool,
}

/// The rendezvous between one fiber thread and whichever scheduler worker
/// is currently driving it.
pub(crate) struct FiberContext {
    switch_lock: Mutex<()>,
    gate: Mutex<Gate>,
    cv: Condvar,
}

impl FiberContext {
    pub(crate) fn new() -> Self {
        Self {
            switch_lock: Mutex::new(()),
            gate: Mutex::new(Gate { turn: Turn::Scheduler, finished: false }),
            cv: Condvar::new(),
        }
    }

    /// Scheduler side: give the fiber the turn and wait until it suspends
    /// or finishes. Returns immediately if the fiber already finished.
    pub(crate) fn resume(&self) {
        let _switch = self.switch_lock.lock();
        let mut gate = self.gate.lock();
        if gate.finished {
            return;
        }
        gate.turn = Turn::Fiber;
        self.cv.notify_all();
        while gate.turn == Turn::Fiber && !gate.finished {
            self.cv.wait(&mut gate);
        }
    }

    /// Fiber side: give the turn back and wait to be resumed.
    pub(crate) fn suspend(&self) {
        let mut gate = self.gate.lock();
        gate.turn = Turn::Scheduler;
        self.cv.notify_all();
        while gate.turn == Turn::Scheduler {
            self.cv.wait(&mut gate);
        }
    }

    /// Fiber side: block until the first resume before entering the body.
    pub(crate) fn wait_first_resume(&self) {
        let mut gate = self.gate.lock();
        while gate.turn == Turn::Scheduler {
            self.cv.wait(&mut gate);
        }
    }

    /// Fiber side: final return of the turn; the context is spent.
    pub(crate) fn finish(&self) {
        let mut gate = self.gate.lock();
        gate.finished = true;
        gate.turn = Turn::Scheduler;
        self.cv.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.gate.lock().finished
    }
}
