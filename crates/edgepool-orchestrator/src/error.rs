// Error types for the worker pool

use edgepool_abstraction::ModelType;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for worker pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Worker pool errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    /// No capacity left and no idle worker could be reclaimed
    #[error("Worker pool exhausted: all {max_workers} workers are in use")]
    PoolExhausted {
        /// Configured pool size
        max_workers: usize,
    },

    /// The execution unit did not acknowledge the handshake in time
    #[error("Worker for {model_type} did not initialize within {timeout:?}")]
    InitializationTimeout {
        /// Model type of the discarded worker
        model_type: ModelType,
        /// Handshake bound
        timeout: Duration,
    },

    /// The execution unit reported an error during the handshake
    #[error("Worker for {model_type} failed to initialize: {message}")]
    InitializationFailed {
        /// Model type of the discarded worker
        model_type: ModelType,
        /// Unit-reported message
        message: String,
    },

    /// No worker with this id was ever created by the pool
    #[error("Worker not found: {0}")]
    NotFound(String),

    /// The worker was terminated
    #[error("Worker terminated: {0}")]
    Terminated(String),

    /// The execution unit reported a failure for the task
    #[error("{0}")]
    Inference(String),

    /// The task was cancelled before it produced a result
    #[error("Inference cancelled on worker {0}")]
    Cancelled(String),

    /// An operation was attempted in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
