//! Persistence seam for cached weights.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::CacheResult;
use super::types::{CacheEntry, CachedModelInfo};

/// Durable key-value store for weight blobs, keyed by `model_id`.
///
/// Implementations must keep at most one entry per key and list entries in
/// least-recently-used order, breaking `last_used` ties by `model_id`.
#[async_trait]
pub trait WeightStore: Send + Sync {
    /// Prepares the store (creates tables, indexes).
    async fn initialize(&self) -> CacheResult<()>;

    /// Fetches a full entry, blob included.
    async fn get(&self, model_id: &str) -> CacheResult<Option<CacheEntry>>;

    /// Inserts or replaces an entry.
    async fn put(&self, entry: &CacheEntry) -> CacheResult<()>;

    /// Removes an entry. Returns whether one existed.
    async fn delete(&self, model_id: &str) -> CacheResult<bool>;

    /// Lists all entries without their blobs, least recently used first.
    async fn list(&self) -> CacheResult<Vec<CachedModelInfo>>;

    /// Whether an entry exists for `model_id`. Does not load its blob.
    async fn contains(&self, model_id: &str) -> CacheResult<bool> {
        Ok(self.list().await?.iter().any(|info| info.model_id == model_id))
    }

    /// Returns the least recently used entry, if any.
    async fn oldest(&self) -> CacheResult<Option<CachedModelInfo>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Updates an entry's `last_used`. Returns whether the entry existed.
    async fn touch(&self, model_id: &str, last_used: DateTime<Utc>) -> CacheResult<bool>;

    /// Sum of `size_bytes` over all entries.
    async fn total_size(&self) -> CacheResult<u64> {
        Ok(self.list().await?.iter().map(|info| info.size_bytes).sum())
    }

    /// Removes every entry.
    async fn clear(&self) -> CacheResult<()>;
}
