//! Persistent weight cache.
//!
//! Downloads model weights once, keeps them in a durable store keyed by
//! model id, and keeps the stored total under a byte quota by evicting the
//! least recently used entries before each write.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod sqlite;
pub mod store;
pub mod types;

pub use cache::WeightCache;
pub use config::{CacheConfigError, WeightCacheConfig};
pub use error::{CacheError, CacheResult};
pub use fetch::{HttpFetcher, WeightFetcher, WeightStream};
pub use sqlite::SqliteWeightStore;
pub use store::WeightStore;
pub use types::{CacheEntry, CacheStats, CachedModelInfo, LoadPhase, LoadProgress, ModelMetadata};
