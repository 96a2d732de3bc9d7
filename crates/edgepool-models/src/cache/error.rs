//! Errors raised by the weight cache.

use thiserror::Error;

use super::config::CacheConfigError;

/// Result alias for weight cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while loading or storing model weights.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The weights could not be downloaded.
    #[error("Network error: {0}")]
    Network(String),

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Downloaded weights did not match the expected checksum.
    #[error("Checksum mismatch for {model_id}: expected {expected}, got {actual}")]
    Integrity {
        /// The model whose download was rejected.
        model_id: String,
        /// The digest from the metadata.
        expected: String,
        /// The digest of the downloaded bytes.
        actual: String,
    },

    /// The cache configuration is invalid.
    #[error("Invalid cache configuration: {0}")]
    Config(#[from] CacheConfigError),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Storage(format!("store task failed: {err}"))
    }
}
