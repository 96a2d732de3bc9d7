// Pool configuration
//
// Pool sizing and timing, the weight cache settings and the model catalog,
// loaded together from one TOML file.

use edgepool_models::{CacheConfigError, ModelCatalog, ModelMetadata, WeightCacheConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration loading and validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("Failed to read config file {path}: {message}")]
    Read {
        /// Offending path
        path: String,
        /// I/O error text
        message: String,
    },

    /// The file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A pool setting is out of range
    #[error("Invalid pool setting `{field}`: must be greater than 0")]
    InvalidPool {
        /// Offending field
        field: &'static str,
    },

    /// The cache section is invalid
    #[error(transparent)]
    Cache(#[from] CacheConfigError),
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live execution units
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Seconds a ready worker may sit unused before it can be reclaimed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweep ticks
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Seconds to wait for a unit's handshake acknowledgment
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_max_workers() -> usize {
    2
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl PoolConfig {
    /// Validate the pool configuration
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidPool` naming the first zero-valued field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_workers", self.max_workers as u64),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("handshake_timeout_secs", self.handshake_timeout_secs),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::InvalidPool { field: *field }),
            None => Ok(()),
        }
    }

    /// Idle timeout as a `Duration`
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Sweep interval as a `Duration`
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Complete edgepool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgepoolConfig {
    /// `[pool]` section
    #[serde(default)]
    pub pool: PoolConfig,
    /// `[cache]` section
    #[serde(default)]
    pub cache: WeightCacheConfig,
    /// `[[models]]` entries
    #[serde(default)]
    pub models: Vec<ModelMetadata>,
}

impl EdgepoolConfig {
    /// Parse configuration from a TOML string
    ///
    /// # Errors
    /// Returns error if the TOML cannot be parsed or a section is invalid
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    ///
    /// # Errors
    /// Returns the first invalid section's error
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.cache.validate()?;
        Ok(())
    }

    /// Build the model catalog from the `[[models]]` entries
    pub fn catalog(&self) -> ModelCatalog {
        self.models.iter().cloned().collect()
    }
}

/// Load configuration from a TOML file
///
/// A missing file yields the defaults.
///
/// # Errors
/// Returns error if the file exists but cannot be read, parsed or validated
pub fn load_config(path: impl AsRef<Path>) -> Result<EdgepoolConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(EdgepoolConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let config = EdgepoolConfig::from_toml_str(&content)?;
    info!(
        path = %path.display(),
        max_workers = config.pool.max_workers,
        models = config.models.len(),
        "Loaded configuration"
    );
    Ok(config)
}
