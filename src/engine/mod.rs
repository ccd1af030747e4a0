//! The engine facade: state, pool and dispatchers wired together.

mod job_dispatcher;
mod op_dispatcher;
mod pool;
pub(crate) mod signal;

pub use job_dispatcher::JobDispatcher;
pub use op_dispatcher::OperationDispatcher;
pub use pool::{PoolStats, WorkerPool};

use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::op::Operation;
use crate::state::SharedState;

/// Anything that can take an operation and run it.
///
/// The fiber scheduler is written against this trait rather than against
/// [`Engine`] directly, so tests and embedders can supply their own
/// execution backend.
pub trait OperationRunner: Send + Sync {
    /// Queue the operation for execution.
    fn run_operation(&self, op: Operation);
}

/// A modest engine: a typed shared state plus an operation dispatcher over
/// a bounded worker pool.
///
/// Operations queued while the engine is stopped stay queued until a
/// subsequent [`start`](Self::start) or
/// [`OperationDispatcher::clear_queued`].
pub struct Engine {
    state: Arc<SharedState>,
    pool: Arc<WorkerPool>,
    dispatcher: Arc<OperationDispatcher>,
}

impl Engine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        // The default configuration is always valid.
        Self::with_config(&EngineConfig::default()).expect("default configuration is valid")
    }

    /// Create an engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the configuration fails
    /// validation.
    pub fn with_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let state = SharedState::new();
        let pool = WorkerPool::new(&config.pool);
        let dispatcher = OperationDispatcher::new(Arc::clone(&state), Arc::clone(&pool));
        debug!(pool_size = config.pool.size, "engine created");
        Ok(Self { state, pool, dispatcher })
    }

    /// Queue an operation for execution.
    ///
    /// The operation may be deferred by its guard, canceled by its guard or
    /// an interrupt, or dispatched; its status flags and
    /// [`wait_for`](Operation::wait_for) report the outcome.
    pub fn queue(&self, op: Operation) {
        self.dispatcher.queue(op);
    }

    /// Begin executing queued operations.
    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Stop executing queued operations and interrupt all running ones.
    ///
    /// Queued operations survive for a later `start`.
    pub fn stop(&self) {
        self.dispatcher.request_stop();
        self.pool.terminate();
        self.dispatcher.stop();
    }

    /// The engine's shared state.
    #[must_use]
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// The engine's worker pool.
    ///
    /// Jobs submitted here directly compete with the dispatcher for
    /// capacity; prefer [`queue`](Self::queue) so admission stays under
    /// guard control.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The engine's operation dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<OperationDispatcher> {
        &self.dispatcher
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRunner for Engine {
    fn run_operation(&self, op: Operation) {
        self.queue(op);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispatcher.request_stop();
    }
}
