//! WAL-backed storage engine

use super::{Storage, StorageOptions};
use crate::memtable::MemTable;
use crate::wal::{Wal, WalRecord};
use crate::{Metric, MetricKind, Result, TallyError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Metric store backed by a write-ahead log file.
///
/// All reads and writes are serialized through a single-permit gate that
/// guards the log buffer and the index together.
pub struct WalStorage {
    shared: Arc<Shared>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    path: PathBuf,
    /// Exclusive access token; closed once the storage is closed
    gate: Semaphore,
    /// Only touched while holding a `gate` permit
    state: Mutex<State>,
    synced: bool,
    /// Stops the background flush task
    shutdown: CancellationToken,
}

struct State {
    wal: Wal,
    memtable: MemTable,
}

impl WalStorage {
    /// Open or create the log at `path`.
    ///
    /// With `restore` the whole log is replayed into memory first and any
    /// corrupt record aborts the open; without it the file is truncated.
    /// A non-zero `store_interval` spawns a periodic flush task and requires
    /// a Tokio runtime.
    pub fn open(path: impl AsRef<Path>, options: StorageOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut wal = Wal::open(&path, !options.restore)?;
        let mut memtable = MemTable::new();

        if options.restore {
            let replayed = wal.read_all(|record| {
                memtable.conflict(&record.metric)?;
                memtable.apply(&record);
                Ok(())
            })?;
            info!(
                path = %path.display(),
                records = replayed,
                metrics = memtable.len(),
                "Restored metrics from WAL"
            );
        }

        let synced = options.is_synced();
        let shared = Arc::new(Shared {
            path,
            gate: Semaphore::new(1),
            state: Mutex::new(State { wal, memtable }),
            synced,
            shutdown: CancellationToken::new(),
        });

        let flusher = if synced {
            None
        } else {
            let handle = Handle::try_current().map_err(|_| {
                TallyError::Config("periodic flush requires a Tokio runtime".into())
            })?;
            Some(handle.spawn(flush_loop(shared.clone(), options.store_interval)))
        };

        info!(
            path = %shared.path.display(),
            synced,
            interval = ?options.store_interval,
            "Opened WAL storage"
        );

        Ok(Self {
            shared,
            flusher: Mutex::new(flusher),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl Shared {
    /// Take the gate, or give up when `ctx` is cancelled or the storage closes
    async fn acquire(&self, ctx: &CancellationToken) -> Result<SemaphorePermit<'_>> {
        if self.gate.is_closed() {
            return Err(TallyError::StorageClosed);
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(TallyError::Cancelled),
            permit = self.gate.acquire() => permit.map_err(|_| TallyError::StorageClosed),
        }
    }
}

impl State {
    /// Validate the whole batch, then log and merge it.
    /// Returns the stored values and how many records were appended.
    /// Zero values and unnamed metrics are skipped.
    fn save_batch(&mut self, metrics: &[Metric]) -> Result<(Vec<Metric>, usize)> {
        self.wal.writable()?;

        let mut kinds: HashMap<&str, MetricKind> = HashMap::new();
        let mut frames: Vec<Option<(WalRecord, Bytes)>> = Vec::with_capacity(metrics.len());

        for metric in metrics {
            if metric.is_zero() || metric.name().is_empty() {
                frames.push(None);
                continue;
            }
            match kinds.get(metric.name()) {
                Some(&kind) if kind != metric.kind() => {
                    return Err(TallyError::Conflict {
                        name: metric.name().to_string(),
                        existing: kind,
                        incoming: metric.kind(),
                    })
                }
                Some(_) => {}
                None => {
                    self.memtable.conflict(metric)?;
                    kinds.insert(metric.name(), metric.kind());
                }
            }
            let record = WalRecord::for_metric(metric.clone())?;
            let frame = record.encode()?;
            frames.push(Some((record, frame)));
        }

        let mut actual = Vec::with_capacity(metrics.len());
        let mut written = 0;
        for entry in frames {
            match entry {
                Some((record, frame)) => {
                    self.wal.append_frame(&frame);
                    actual.push(self.memtable.apply(&record));
                    written += 1;
                }
                None => actual.push(Metric::default()),
            }
        }

        Ok((actual, written))
    }
}

#[async_trait]
impl Storage for WalStorage {
    async fn save(&self, ctx: &CancellationToken, metrics: Vec<Metric>) -> Result<Vec<Metric>> {
        if metrics.is_empty() {
            return Err(TallyError::EmptyInput);
        }
        let _permit = self.shared.acquire(ctx).await?;

        let mut state = self.shared.state.lock();
        let (actual, written) = state.save_batch(&metrics)?;
        if self.shared.synced && written > 0 {
            state.wal.flush()?;
        }

        Ok(actual)
    }

    async fn get(&self, ctx: &CancellationToken, name: &str) -> Result<Metric> {
        let _permit = self.shared.acquire(ctx).await?;

        let metric = self.shared.state.lock().memtable.get(name);
        if metric.is_zero() {
            return Err(TallyError::NotFound(name.to_string()));
        }
        Ok(metric)
    }

    async fn get_all(&self, ctx: &CancellationToken) -> Result<Vec<Metric>> {
        let _permit = self.shared.acquire(ctx).await?;

        let mut metrics = self.shared.state.lock().memtable.get_all();
        metrics.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(metrics)
    }

    async fn ping(&self, ctx: &CancellationToken) -> Result<()> {
        let _permit = self.shared.acquire(ctx).await?;
        self.shared.state.lock().wal.writable()
    }

    async fn close(&self) -> Result<()> {
        let permit = self.shared.acquire(&CancellationToken::new()).await?;

        let closed = self.shared.state.lock().wal.close();

        self.shared.shutdown.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(handle) = flusher {
            if let Err(e) = handle.await {
                warn!(error = %e, "WAL flush task failed");
            }
        }

        self.shared.gate.close();
        drop(permit);

        info!(path = %self.shared.path.display(), "Closed WAL storage");
        closed
    }
}

impl Drop for WalStorage {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if self.shared.gate.is_closed() {
            return;
        }
        // Dropped without close: keep what is buffered
        if let Some(mut state) = self.shared.state.try_lock() {
            if let Err(e) = state.wal.flush() {
                warn!(path = %self.shared.path.display(), error = %e, "Failed to flush WAL on drop");
            }
        }
    }
}

/// Flush the log every `period` until shutdown. `close` does the final flush.
async fn flush_loop(shared: Arc<Shared>, period: Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let permit = match shared.acquire(&shared.shutdown).await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let flushed = shared.state.lock().wal.flush();
        drop(permit);

        match flushed {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!(path = %shared.path.display(), error = %e, "Periodic WAL flush failed");
            }
            Err(e) => {
                error!(path = %shared.path.display(), error = %e, "WAL unusable, stopping periodic flush");
                break;
            }
        }
    }

    debug!(path = %shared.path.display(), "WAL flush task stopped");
}
