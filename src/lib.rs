//! # Modest Engine
//!
//! A modest two-layer work engine for synchronous workloads.
//!
//! The **operation layer** executes guarded units of work ([`Operation`])
//! on a bounded pool of reusable worker threads. Every operation may carry
//! an admission guard and a state mutator; the [`engine::OperationDispatcher`]
//! evaluates guards against a shared, typed [`state::State`] and commits
//! admitted operations atomically with their pre-execution state change.
//!
//! The **fiber layer** ([`fiber::FiberScheduler`]) multiplexes lightweight
//! cooperative fibers over N operations of the layer below, giving M:N
//! scheduling with strict FIFO fairness and explicit `yield`/`sleep`/`wakeup`
//! control.
//!
//! ## Modules
//!
//! - [`engine`] - the engine facade, worker pool and dispatchers
//! - [`op`] - operations, guards, mutators and operation lists
//! - [`state`] - the shared typed key-value engine state
//! - [`fiber`] - cooperative fibers and the M:N fiber scheduler
//! - [`sync`] - lock re-exports and cooperative interruption
//! - [`config`] - engine and pool configuration
//! - [`error`] - error types
//!
//! ## Example
//!
//! Queue a plain operation and wait for it:
//!
//! ```
//! use modest_engine::{Engine, Operation, RunnableFn};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! let engine = Engine::new();
//! engine.start();
//!
//! let counter = Arc::new(AtomicU32::new(0));
//! let c = Arc::clone(&counter);
//! let op = Operation::new(RunnableFn::new("count", move || {
//!     c.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! engine.queue(op.clone());
//! assert!(op.wait_for(false));
//! assert!(op.finished());
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//!
//! engine.stop();
//! ```
//!
//! Guarded admission: an operation only runs once the state allows it.
//!
//! ```
//! use modest_engine::{Engine, Operation, RunnableFn};
//! use modest_engine::op::GuardFn;
//! use modest_engine::state::Value;
//!
//! let engine = Engine::new();
//! engine.state().set("ready", Value::Bool(true));
//! engine.start();
//!
//! let op = Operation::new(RunnableFn::new("guarded", || {}))
//!     .with_guard(GuardFn::new(|state| state.get_bool("ready") == Some(true)));
//! engine.queue(op.clone());
//! assert!(op.wait_for(false));
//! engine.stop();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod fiber;
pub mod op;
pub mod runnable;
pub mod state;
pub mod sync;
pub mod telemetry;

// Re-export main types for convenience
pub use config::{EngineConfig, PoolConfig};
pub use engine::{Engine, JobDispatcher, OperationDispatcher, OperationRunner, WorkerPool};
pub use error::{ConfigError, EngineError, PoolError};
pub use fiber::{Fiber, FiberApi, FiberId, FiberScheduler, FiberState};
pub use op::{Operation, OperationGuard, OperationList, StateMutator};
pub use runnable::{Runnable, RunnableFn};
pub use state::{SharedState, State, Value};
pub use sync::InterruptHandle;
