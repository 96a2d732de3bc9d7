//! Configuration for the weight cache.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// One gibibyte.
const GIB: u64 = 1024 * 1024 * 1024;

/// Configuration for the weight cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightCacheConfig {
    /// Maximum total size of cached weights in bytes (default: 10 GiB).
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Fraction of `max_cache_bytes` above which eviction starts (default: 0.9).
    #[serde(default = "default_eviction_trigger_ratio")]
    pub eviction_trigger_ratio: f64,

    /// Fraction of `max_cache_bytes` eviction drains down to (default: 0.7).
    #[serde(default = "default_eviction_target_ratio")]
    pub eviction_target_ratio: f64,

    /// SQLite database file backing the cache. In-memory when absent.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_max_cache_bytes() -> u64 {
    10 * GIB
}

fn default_eviction_trigger_ratio() -> f64 {
    0.9
}

fn default_eviction_target_ratio() -> f64 {
    0.7
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheConfigError {
    /// Invalid maximum size (must be > 0).
    #[error("Invalid max cache size: must be greater than 0")]
    InvalidMaxCacheBytes,

    /// Ratios must satisfy `0 < target < trigger <= 1`.
    #[error("Invalid eviction ratios: target {target} and trigger {trigger} must satisfy 0 < target < trigger <= 1")]
    InvalidEvictionRatios {
        /// The configured trigger ratio.
        trigger: f64,
        /// The configured target ratio.
        target: f64,
    },
}

impl Default for WeightCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: default_max_cache_bytes(),
            eviction_trigger_ratio: default_eviction_trigger_ratio(),
            eviction_target_ratio: default_eviction_target_ratio(),
            database_path: None,
        }
    }
}

impl WeightCacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.max_cache_bytes == 0 {
            return Err(CacheConfigError::InvalidMaxCacheBytes);
        }

        let trigger = self.eviction_trigger_ratio;
        let target = self.eviction_target_ratio;
        if !(target > 0.0 && target < trigger && trigger <= 1.0) {
            return Err(CacheConfigError::InvalidEvictionRatios { trigger, target });
        }

        Ok(())
    }

    /// Total size above which `enforce_quota` starts evicting.
    #[must_use]
    pub fn eviction_trigger_bytes(&self) -> u64 {
        (self.max_cache_bytes as f64 * self.eviction_trigger_ratio) as u64
    }

    /// Total size `enforce_quota` evicts down to.
    #[must_use]
    pub fn eviction_target_bytes(&self) -> u64 {
        (self.max_cache_bytes as f64 * self.eviction_target_ratio) as u64
    }
}
