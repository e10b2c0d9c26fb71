//! Server configuration
//!
//! Sources, highest priority first: environment, command-line flags,
//! a JSON file named by `CONFIG`, a JSON file named by `--config`, defaults.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_core::storage::StorageOptions;
use thiserror::Error;

/// Tally metrics server
#[derive(Parser, Debug, Default)]
#[command(name = "tally", version, about, long_about = None)]
pub struct Cli {
    /// HTTP listen address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Seconds between background WAL flushes (0 flushes on every write)
    #[arg(short = 'i', long)]
    pub store_interval: Option<u64>,

    /// WAL file location
    #[arg(short = 'f', long)]
    pub file_storage_path: Option<PathBuf>,

    /// Replay the WAL on startup
    #[arg(short = 'r', long)]
    pub restore: Option<bool>,

    /// JSON configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Configuration file contents; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub address: Option<String>,
    pub store_interval: Option<u64>,
    pub file_storage_path: Option<PathBuf>,
    pub restore: Option<bool>,
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Resolved server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    pub store_interval: Duration,
    pub file_storage_path: PathBuf,
    pub restore: bool,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval: tally_core::config::DEFAULT_STORE_INTERVAL,
            file_storage_path: PathBuf::from(tally_core::config::DEFAULT_FILE_STORAGE_PATH),
            restore: true,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Merge every source. `env` looks up an environment variable.
    pub fn resolve<F>(cli: &Cli, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let file = env("CONFIG")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| cli.config.clone());
        if let Some(path) = file {
            config.apply_file(FileConfig::load(&path)?);
        }

        if let Some(address) = &cli.address {
            config.address = address.clone();
        }
        if let Some(secs) = cli.store_interval {
            config.store_interval = Duration::from_secs(secs);
        }
        if let Some(path) = &cli.file_storage_path {
            config.file_storage_path = path.clone();
        }
        if let Some(restore) = cli.restore {
            config.restore = restore;
        }

        if let Some(address) = env("ADDRESS") {
            config.address = address;
        }
        if let Some(secs) = parse_env(&env, "STORE_INTERVAL")? {
            config.store_interval = Duration::from_secs(secs);
        }
        if let Some(path) = env("FILE_STORAGE_PATH") {
            config.file_storage_path = PathBuf::from(path);
        }
        if let Some(restore) = parse_env(&env, "RESTORE")? {
            config.restore = restore;
        }

        Ok(config)
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            store_interval: self.store_interval,
            restore: self.restore,
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(address) = file.address {
            self.address = address;
        }
        if let Some(secs) = file.store_interval {
            self.store_interval = Duration::from_secs(secs);
        }
        if let Some(path) = file.file_storage_path {
            self.file_storage_path = path;
        }
        if let Some(restore) = file.restore {
            self.restore = restore;
        }
        if let Some(secs) = file.request_timeout {
            self.request_timeout = Duration::from_secs(secs);
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_env<F, T>(env: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match env(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}
