//! Error types for engine construction and submission surfaces.
//!
//! The scheduling core itself never propagates errors across worker
//! boundaries: runnable failures are absorbed and surfaced through status
//! flags and completion broadcasts. The types here cover configuration and
//! the few operations that can be refused outright.

use thiserror::Error;

/// Configuration validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Configuration could not be parsed from JSON.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors produced by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been terminated; no further work is accepted.
    #[error("pool has been terminated")]
    Terminated,
}

/// Top-level errors surfaced by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The worker pool refused a submission.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ConfigError::Invalid("size must be greater than 0".into()).to_string(),
            "invalid configuration: size must be greater than 0"
        );
        assert_eq!(PoolError::Terminated.to_string(), "pool has been terminated");
    }

    #[test]
    fn engine_error_is_transparent() {
        let err = EngineError::from(PoolError::Terminated);
        assert_eq!(err.to_string(), "pool has been terminated");

        let err = EngineError::from(ConfigError::Invalid("bad".into()));
        assert_eq!(err.to_string(), "invalid configuration: bad");
    }
}
