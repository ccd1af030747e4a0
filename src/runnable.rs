//! The unit of executable work accepted by the engine.

use std::fmt;

/// A callable producing side effects, optionally interruptible.
///
/// Runnables are shared between the queue that holds them, the worker that
/// executes them and any caller retaining a handle, so `run` takes `&self`;
/// implementations that need mutable state use interior mutability.
///
/// `interrupt` is a cooperative hook: the pool invokes it when running work
/// is being terminated, and implementations are expected to observe it at
/// convenient points. The default is a no-op.
pub trait Runnable: Send + Sync + 'static {
    /// Execute the work.
    fn run(&self);

    /// Ask the work to stop at its next convenient point.
    fn interrupt(&self) {}

    /// A short name for diagnostics; flows into log fields and thread names.
    fn name(&self) -> &str {
        "runnable"
    }
}

/// Adapts a closure into a [`Runnable`].
///
/// # Example
///
/// ```
/// use modest_engine::{Runnable, RunnableFn};
///
/// let r = RunnableFn::new("hello", || println!("hi"));
/// assert_eq!(r.name(), "hello");
/// r.run();
/// ```
pub struct RunnableFn<F> {
    name: String,
    f: F,
}

impl<F> RunnableFn<F>
where
    F: Fn() + Send + Sync + 'static,
{
    /// Wrap `f` under the given diagnostic name.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Runnable for RunnableFn<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        (self.f)();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for RunnableFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableFn").field("name", &self.name).finish()
    }
}
