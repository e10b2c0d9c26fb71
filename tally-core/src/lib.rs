//! Tally Core - write-ahead logged metric storage
//!
//! Agents report two kinds of numeric telemetry:
//!
//! - **Counters** accumulate: every update adds a delta to the stored total.
//! - **Gauges** overwrite: every update replaces the stored value.
//!
//! # Architecture
//!
//! - **WAL (Write-Ahead Log)**: every accepted update is framed with a CRC32
//!   checksum and appended to a single log file, replayed on restart
//! - **MemTable**: the current value of every metric, keyed by name
//! - **Storage**: serializes access to both behind a cancellable lock and
//!   flushes the log either on every save or on a timer

pub mod memtable;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{Result, TallyError};
pub use types::*;

/// Tally version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    use std::time::Duration;

    /// Background flush period (5 minutes)
    pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

    /// Log file used when none is configured
    pub const DEFAULT_FILE_STORAGE_PATH: &str = "data/metrics.wal";
}
