//! Quota-bounded, LRU-evicting cache of model weights.

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::config::WeightCacheConfig;
use super::error::{CacheError, CacheResult};
use super::fetch::{HttpFetcher, WeightFetcher};
use super::sqlite::SqliteWeightStore;
use super::store::WeightStore;
use super::types::{
    CacheEntry, CacheStats, CachedModelInfo, LoadPhase, LoadProgress, ModelMetadata, timestamp_now,
};

/// Upper bound on the buffer reserved up front for a download.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Share of the overall load attributed to the download phase.
const DOWNLOAD_SHARE: f64 = 90.0;

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

/// Persistent cache of model weight blobs.
///
/// Weights are downloaded once, stored keyed by `model_id`, and served from
/// the store on later loads. Before every write the cache enforces its quota:
/// once the stored total exceeds the trigger threshold, least recently used
/// entries are evicted until the total drops to the target threshold.
///
/// The read-then-evict sequence is not coordinated across processes sharing
/// the same database file.
pub struct WeightCache {
    store: Arc<dyn WeightStore>,
    fetcher: Arc<dyn WeightFetcher>,
    config: WeightCacheConfig,
    stats: StatsCounters,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for WeightCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightCache")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl WeightCache {
    /// Creates a cache over the given store and fetcher.
    ///
    /// # Errors
    /// Returns `CacheError::Config` if the configuration is invalid.
    pub fn new(
        config: WeightCacheConfig,
        store: Arc<dyn WeightStore>,
        fetcher: Arc<dyn WeightFetcher>,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self { store, fetcher, config, stats: StatsCounters::default(), ready: OnceCell::new() })
    }

    /// Creates a cache backed by SQLite and HTTP.
    ///
    /// Uses `config.database_path` when set and an in-memory database otherwise.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the database cannot
    /// be opened, or the HTTP client cannot be built.
    pub fn open(config: WeightCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let store = match &config.database_path {
            Some(path) => SqliteWeightStore::open(path)?,
            None => SqliteWeightStore::open_in_memory()?,
        };
        let fetcher = HttpFetcher::new()?;
        Self::new(config, Arc::new(store), Arc::new(fetcher))
    }

    /// The cache configuration.
    #[must_use]
    pub fn config(&self) -> &WeightCacheConfig {
        &self.config
    }

    /// Attaches the persistent store. Idempotent; every other operation
    /// calls it lazily.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store cannot be prepared.
    pub async fn initialize(&self) -> CacheResult<()> {
        self.ready
            .get_or_try_init(|| async {
                self.store.initialize().await?;
                info!(max_cache_bytes = self.config.max_cache_bytes, "Weight cache initialized");
                Ok::<(), CacheError>(())
            })
            .await?;
        Ok(())
    }

    /// Returns the weights for `metadata`, downloading and caching them on a miss.
    ///
    /// A hit refreshes the entry's `last_used` and performs no network access.
    /// Progress is reported through `on_progress`: `checking-cache` at 0%,
    /// download progress scaled to 0..90%, `caching` at 95% and `complete`
    /// at 100%.
    ///
    /// # Errors
    /// * `CacheError::Network` - the download failed
    /// * `CacheError::Integrity` - the download did not match `metadata.sha256`
    /// * `CacheError::Storage` - the store failed while reading, evicting or writing
    pub async fn load_model<F>(&self, metadata: &ModelMetadata, on_progress: F) -> CacheResult<Bytes>
    where
        F: Fn(LoadProgress) + Send + Sync,
    {
        self.initialize().await?;
        let model_id = metadata.model_id.as_str();

        on_progress(LoadProgress::new(
            LoadPhase::CheckingCache,
            0,
            metadata.size_bytes,
            0.0,
            format!("Checking cache for {model_id}"),
        ));

        if let Some(entry) = self.store.get(model_id).await? {
            self.store.touch(model_id, timestamp_now()).await?;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(model_id, size_bytes = entry.size_bytes, "Weight cache hit");
            on_progress(LoadProgress::new(
                LoadPhase::Complete,
                entry.size_bytes,
                entry.size_bytes,
                100.0,
                format!("Loaded {model_id} from cache"),
            ));
            return Ok(entry.weights);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let weights = self.download(metadata, &on_progress).await?;
        let size = weights.len() as u64;

        if let Some(expected) = &metadata.sha256 {
            let actual = hex::encode(Sha256::digest(&weights));
            if !actual.eq_ignore_ascii_case(expected) {
                warn!(model_id, expected = %expected, actual = %actual, "Rejected weights with bad checksum");
                return Err(CacheError::Integrity {
                    model_id: model_id.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        on_progress(LoadProgress::new(
            LoadPhase::Caching,
            size,
            size,
            95.0,
            format!("Caching {model_id}"),
        ));
        self.enforce_quota().await?;

        let entry = CacheEntry::new(metadata, weights.clone(), timestamp_now());
        self.store.put(&entry).await?;
        info!(model_id, model_type = %metadata.model_type, bytes = size, "Model cached");

        on_progress(LoadProgress::new(
            LoadPhase::Complete,
            size,
            size,
            100.0,
            format!("Loaded {model_id}"),
        ));
        Ok(weights)
    }

    async fn download<F>(&self, metadata: &ModelMetadata, on_progress: &F) -> CacheResult<Bytes>
    where
        F: Fn(LoadProgress) + Send + Sync,
    {
        let model_id = metadata.model_id.as_str();
        on_progress(LoadProgress::new(
            LoadPhase::Downloading,
            0,
            metadata.size_bytes,
            0.0,
            format!("Downloading {model_id}"),
        ));

        let stream = self.fetcher.fetch(&metadata.source_url).await?;
        let total = stream.content_length.unwrap_or(metadata.size_bytes);
        let capacity = usize::try_from(total.min(MAX_PREALLOCATION)).unwrap_or_default();
        let mut buffer = Vec::with_capacity(capacity);
        let mut chunks = stream.chunks;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            self.stats.bytes_downloaded.fetch_add(chunk.len() as u64, Ordering::Relaxed);

            let loaded = buffer.len() as u64;
            let percentage = if total > 0 {
                ((loaded as f64 / total as f64) * DOWNLOAD_SHARE).min(DOWNLOAD_SHARE)
            } else {
                0.0
            };
            on_progress(LoadProgress::new(
                LoadPhase::Downloading,
                loaded,
                total,
                percentage as f32,
                format!("Downloaded {loaded} of {total} bytes"),
            ));
        }

        debug!(model_id, bytes = buffer.len(), "Download finished");
        Ok(Bytes::from(buffer))
    }

    /// Evicts least recently used entries once the stored total exceeds the
    /// trigger threshold, until it is at or below the target threshold or the
    /// store is empty. Returns the evicted model ids in eviction order.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if listing or deleting fails. A failed
    /// delete aborts the pass so no write follows it.
    pub async fn enforce_quota(&self) -> CacheResult<Vec<String>> {
        self.initialize().await?;
        let mut total = self.store.total_size().await?;
        let trigger = self.config.eviction_trigger_bytes();
        if total <= trigger {
            return Ok(Vec::new());
        }

        let target = self.config.eviction_target_bytes();
        info!(total, trigger, target, "Cache over quota, evicting");

        let mut evicted = Vec::new();
        while total > target {
            let Some(info) = self.evict_least_recently_used().await? else {
                break;
            };
            total = total.saturating_sub(info.size_bytes);
            evicted.push(info.model_id);
        }
        Ok(evicted)
    }

    /// Deletes the entry with the oldest `last_used` (ties broken by
    /// `model_id`). Returns it, or `None` when the cache is empty.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store fails.
    pub async fn evict_least_recently_used(&self) -> CacheResult<Option<CachedModelInfo>> {
        self.initialize().await?;
        let Some(oldest) = self.store.oldest().await? else {
            return Ok(None);
        };
        self.store.delete(&oldest.model_id).await?;
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        info!(model_id = %oldest.model_id, bytes = oldest.size_bytes, "Evicted cached model");
        Ok(Some(oldest))
    }

    /// Total size of all cached entries in bytes.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store fails.
    pub async fn get_cache_size(&self) -> CacheResult<u64> {
        self.initialize().await?;
        self.store.total_size().await
    }

    /// Lists cached entries (without blobs), least recently used first.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store fails.
    pub async fn list_cached_models(&self) -> CacheResult<Vec<CachedModelInfo>> {
        self.initialize().await?;
        self.store.list().await
    }

    /// Whether weights for `model_id` are cached. Does not touch `last_used`.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store fails.
    pub async fn is_cached(&self, model_id: &str) -> CacheResult<bool> {
        self.initialize().await?;
        self.store.contains(model_id).await
    }

    /// Removes one entry. Returns whether it existed.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store fails.
    pub async fn remove_model(&self, model_id: &str) -> CacheResult<bool> {
        self.initialize().await?;
        let removed = self.store.delete(model_id).await?;
        if removed {
            info!(model_id, "Removed cached model");
        }
        Ok(removed)
    }

    /// Removes every entry.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the store fails.
    pub async fn clear_cache(&self) -> CacheResult<()> {
        self.initialize().await?;
        self.store.clear().await?;
        info!("Weight cache cleared");
        Ok(())
    }

    /// Snapshot of hit, miss, eviction and download counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
