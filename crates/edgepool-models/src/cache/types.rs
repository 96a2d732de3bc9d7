//! Core data types for weight caching.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use edgepool_abstraction::ModelType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Describes a downloadable set of model weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Cache key of the weights.
    pub model_id: String,
    /// The model type the weights belong to.
    pub model_type: ModelType,
    /// Version of the weights.
    pub version: String,
    /// Expected size in bytes; also the progress total when the server sends no length.
    pub size_bytes: u64,
    /// Where to download the weights from.
    pub source_url: String,
    /// Optional hex-encoded SHA-256 digest verified before caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ModelMetadata {
    /// Create metadata without a checksum.
    #[must_use]
    pub fn new(
        model_id: impl Into<String>,
        model_type: ModelType,
        version: impl Into<String>,
        size_bytes: u64,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            model_type,
            version: version.into(),
            size_bytes,
            source_url: source_url.into(),
            sha256: None,
        }
    }

    /// Attach an expected SHA-256 digest.
    #[must_use]
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }
}

/// A cached weight blob with its bookkeeping.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key.
    pub model_id: String,
    /// The model type the weights belong to.
    pub model_type: ModelType,
    /// Version of the weights.
    pub version: String,
    /// The weights themselves.
    pub weights: Bytes,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// When the entry was last read or written.
    pub last_used: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a fresh entry for downloaded weights, stamped with `now`.
    #[must_use]
    pub fn new(metadata: &ModelMetadata, weights: Bytes, now: DateTime<Utc>) -> Self {
        Self {
            model_id: metadata.model_id.clone(),
            model_type: metadata.model_type,
            version: metadata.version.clone(),
            size_bytes: weights.len() as u64,
            weights,
            cached_at: now,
            last_used: now,
        }
    }

    /// The entry's bookkeeping without the blob.
    #[must_use]
    pub fn info(&self) -> CachedModelInfo {
        CachedModelInfo {
            model_id: self.model_id.clone(),
            model_type: self.model_type,
            version: self.version.clone(),
            size_bytes: self.size_bytes,
            cached_at: self.cached_at,
            last_used: self.last_used,
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("model_id", &self.model_id)
            .field("model_type", &self.model_type)
            .field("version", &self.version)
            .field("size_bytes", &self.size_bytes)
            .field("cached_at", &self.cached_at)
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

/// A cache entry as listed by `list_cached_models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedModelInfo {
    /// Cache key.
    pub model_id: String,
    /// The model type the weights belong to.
    pub model_type: ModelType,
    /// Version of the weights.
    pub version: String,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// When the entry was last read or written.
    pub last_used: DateTime<Utc>,
}

/// Phase of a `load_model` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPhase {
    /// Looking the model up in the store.
    CheckingCache,
    /// Streaming the weights from the network.
    Downloading,
    /// Making room and persisting the weights.
    Caching,
    /// Handing the weights to the engine.
    Loading,
    /// Done.
    Complete,
}

impl LoadPhase {
    /// Returns the phase name used in progress events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CheckingCache => "checking-cache",
            Self::Downloading => "downloading",
            Self::Caching => "caching",
            Self::Loading => "loading",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a `load_model` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadProgress {
    /// Current phase.
    pub phase: LoadPhase,
    /// Bytes obtained so far.
    pub bytes_loaded: u64,
    /// Expected total bytes (0 when unknown).
    pub bytes_total: u64,
    /// Overall completion in `0..=100`.
    pub percentage: f32,
    /// Human-readable detail.
    pub message: String,
}

impl LoadProgress {
    /// Progress report for a phase boundary.
    #[must_use]
    pub fn new(
        phase: LoadPhase,
        bytes_loaded: u64,
        bytes_total: u64,
        percentage: f32,
        message: impl Into<String>,
    ) -> Self {
        Self { phase, bytes_loaded, bytes_total, percentage, message: message.into() }
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Loads served from the store.
    pub hits: u64,
    /// Loads that required a download.
    pub misses: u64,
    /// Entries removed by quota enforcement.
    pub evictions: u64,
    /// Total bytes fetched from the network.
    pub bytes_downloaded: u64,
}

/// Current time truncated to the millisecond precision the store keeps.
pub(crate) fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
