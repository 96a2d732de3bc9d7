//! Model weights and backends for edgepool.
//!
//! This crate provides the persistent weight cache that feeds execution
//! units, the catalog mapping model types to their weights, and the
//! inference backends that run on cached weights.
//!
//! # Components
//!
//! - **Weight cache**: quota-bounded SQLite store with LRU eviction and
//!   streaming HTTP downloads
//! - **Catalog**: which weights each model type loads
//! - **Backends**: `CachedWeightsBackend` plus the `StepEngine` mock engine

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod factory;

pub use backend::{CachedWeightsBackend, Engine, StepEngine};
pub use cache::{
    CacheConfigError, CacheEntry, CacheError, CacheResult, CacheStats, CachedModelInfo,
    HttpFetcher, LoadPhase, LoadProgress, ModelMetadata, SqliteWeightStore, WeightCache,
    WeightCacheConfig, WeightFetcher, WeightStore, WeightStream,
};
pub use catalog::ModelCatalog;
pub use factory::WeightedBackendFactory;
