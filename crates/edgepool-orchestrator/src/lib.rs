//! Worker pool scheduler for edgepool.
//!
//! This crate owns the bounded pool of execution units that run on-device
//! models: handle lifecycle, per-handle FIFO queueing, cooperative
//! cancellation, idle reclamation and progress fan-out. It also loads the
//! TOML configuration and installs tracing for embedding processes.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod progress;
pub mod telemetry;
pub mod unit;

pub use config::{ConfigError, EdgepoolConfig, PoolConfig, load_config};
pub use error::{PoolError, PoolResult};
pub use lifecycle::{WorkerHandle, WorkerStatus};
pub use pool::{PoolMetrics, WorkerPool};
pub use progress::{
    ProgressCallback, ProgressReporter, ProgressSubscription, ProgressUpdate, SubscriptionId,
};
pub use telemetry::init_tracing;
pub use unit::{UnitLink, spawn_unit};
