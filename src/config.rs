//! Engine and pool configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of worker threads.
fn default_pool_size() -> usize {
    num_cpus::get()
}

/// Default idle expiration for pooled workers: 30 seconds.
fn default_idle_expiration_ms() -> u64 {
    30_000
}

/// Default worker thread stack size: 2MB.
fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Configuration for the [`WorkerPool`](crate::engine::WorkerPool).
///
/// # Example
///
/// ```
/// use modest_engine::config::PoolConfig;
///
/// let config = PoolConfig::new()
///     .with_size(4)
///     .with_idle_expiration_ms(10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads the pool may run concurrently.
    ///
    /// Default: `num_cpus::get()`.
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// How long an idle worker waits for a job before terminating itself,
    /// in milliseconds. `0` disables idle expiration; workers then wait
    /// indefinitely.
    ///
    /// Default: 30,000 ms.
    #[serde(default = "default_idle_expiration_ms")]
    pub idle_expiration_ms: u64,

    /// Stack size per worker thread in bytes.
    ///
    /// Default: 2MB.
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            idle_expiration_ms: default_idle_expiration_ms(),
            thread_stack_size: default_thread_stack_size(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the idle expiration in milliseconds (`0` disables expiration).
    #[must_use]
    pub fn with_idle_expiration_ms(mut self, ms: u64) -> Self {
        self.idle_expiration_ms = ms;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Idle expiration as a `Duration`, or `None` when disabled.
    #[must_use]
    pub fn idle_expiration(&self) -> Option<Duration> {
        (self.idle_expiration_ms > 0).then(|| Duration::from_millis(self.idle_expiration_ms))
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::Invalid("size must be greater than 0".into()));
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err(ConfigError::Invalid(
                "thread_stack_size must be at least 64KB".into(),
            ));
        }
        Ok(())
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl EngineConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate all nested configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()
    }

    /// Parse engine configuration from a JSON string and validate it.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
