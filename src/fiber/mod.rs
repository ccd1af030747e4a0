//! Cooperative fibers and the M:N scheduler that runs them.
//!
//! A [`Fiber`] is a stackful cooperative task: its `run` body executes on a
//! private context and returns control to the scheduler only at explicit
//! suspension points (`yield_now`, `sleep`, and the implicit exit when
//! `run` returns). The [`FiberScheduler`] multiplexes any number of fibers
//! over N worker operations queued into the layer below.
//!
//! ## Example
//!
//! ```
//! use modest_engine::{Engine, Fiber, FiberApi, FiberScheduler};
//!
//! struct Greeter(u32);
//!
//! impl Fiber for Greeter {
//!     fn run(&mut self, api: &FiberApi) {
//!         for _ in 0..self.0 {
//!             api.yield_now();
//!         }
//!     }
//! }
//!
//! let engine = Engine::new();
//! engine.start();
//!
//! let scheduler = FiberScheduler::new();
//! scheduler.start(&engine, 2);
//! scheduler.add(Box::new(Greeter(3)));
//! assert!(scheduler.wait_for_last_exit(true));
//! engine.stop();
//! ```

mod context;
mod scheduler;

pub use scheduler::{FiberApi, FiberScheduler};

/// Identifier of a fiber within one scheduler.
///
/// Assigned on add, starting from 1 and advancing monotonically; on counter
/// wrap the scheduler probes its fiber directory to skip occupied slots. An
/// id is never shared by two concurrently live fibers.
pub type FiberId = u64;

/// Lifecycle state of a fiber.
///
/// Transitions only move forward: `New → Running ↔ Sleeping → Exited →
/// Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Queued, not yet first-run.
    New,
    /// Executing on some worker, or eligible in the ready queue.
    Running,
    /// Removed from the ready queue, awaiting an explicit wakeup.
    Sleeping,
    /// `run` returned; the next scheduler pass finalizes the fiber.
    Exited,
    /// Removed from all scheduler tables.
    Dead,
}

/// A cooperative task scheduled by a [`FiberScheduler`].
///
/// Implementors override `run` as the fiber body and may override the two
/// hooks. The [`FiberApi`] handed to `run` is the only way to yield, sleep
/// or wake; it is deliberately not clonable, so suspension points cannot
/// escape the fiber body.
pub trait Fiber: Send + 'static {
    /// The fiber body. Returning exits the fiber.
    fn run(&mut self, api: &FiberApi);

    /// Whether the fiber is currently willing to yield. Helpers that embed
    /// yield points in shared code consult this before calling
    /// [`FiberApi::yield_now`]; the scheduler itself never forces a yield.
    fn yield_allowed(&self) -> bool {
        true
    }

    /// Called after `run` returns, before the fiber is finalized.
    fn exited(&mut self) {}
}
