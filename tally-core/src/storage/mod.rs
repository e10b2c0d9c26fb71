//! Storage engine - the metric store behind the server

mod engine;

pub use engine::WalStorage;

use crate::{Metric, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metric storage backend.
///
/// `ctx` bounds the wait for the storage lock: once it is cancelled the call
/// returns `TallyError::Cancelled` without touching any state. Dropping the
/// returned future has the same effect.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Merge metrics in order, returning the stored value for each slot.
    /// Zero-value metrics are skipped and yield a zero value.
    async fn save(&self, ctx: &CancellationToken, metrics: Vec<Metric>) -> Result<Vec<Metric>>;

    /// Current value of a metric
    async fn get(&self, ctx: &CancellationToken, name: &str) -> Result<Metric>;

    /// Every metric, sorted by name
    async fn get_all(&self, ctx: &CancellationToken) -> Result<Vec<Metric>>;

    /// Succeeds while the storage is open and responsive
    async fn ping(&self, ctx: &CancellationToken) -> Result<()>;

    /// Flush and release resources. Every later call fails with `StorageClosed`.
    async fn close(&self) -> Result<()>;
}

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Background flush period; zero flushes on every save
    pub store_interval: Duration,
    /// Replay the existing log on open instead of truncating it
    pub restore: bool,
}

impl StorageOptions {
    /// Flush on every save
    pub fn synced() -> Self {
        Self {
            store_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn is_synced(&self) -> bool {
        self.store_interval.is_zero()
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            store_interval: crate::config::DEFAULT_STORE_INTERVAL,
            restore: true,
        }
    }
}
