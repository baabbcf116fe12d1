//! Configuration for the points ledger

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Ledger service configuration
    pub ledger: LedgerConfig,

    /// Input bounds applied by the calling layer
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/points"),
            service_name: "points-ledger".to_string(),
            rocksdb: RocksDBConfig::default(),
            ledger: LedgerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// Fsync the WAL on every commit
    pub sync_writes: bool,

    /// How long a transaction may wait for a row lock (milliseconds)
    pub txn_lock_timeout_ms: i64,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
            sync_writes: true,
            txn_lock_timeout_ms: 1_000,
        }
    }
}

/// Ledger service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Retries after a detected write conflict before the error surfaces
    pub conflict_retries: u32,

    /// Page size used when the caller does not ask for one
    pub default_page_size: usize,

    /// Upper bound on leaderboard and history page sizes
    pub max_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 1,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// Bounds on staff command input.
///
/// The ledger itself only rejects non-positive amounts and negative set
/// targets; these limits belong to whoever accepts commands from users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest amount accepted by a single credit, debit or set
    pub max_amount: i64,

    /// Longest reason accepted, in characters
    pub max_reason_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_amount: 1_000_000,
            max_reason_len: 200,
        }
    }
}

impl LimitsConfig {
    /// Check a credit/debit amount against `1..=max_amount`
    pub fn check_amount(&self, amount: i64) -> Result<()> {
        if amount < 1 || amount > self.max_amount {
            return Err(Error::Validation(format!(
                "Amount must be between 1 and {}",
                self.max_amount
            )));
        }
        Ok(())
    }

    /// Check a set target against `0..=max_amount`
    pub fn check_target(&self, target: i64) -> Result<()> {
        if target < 0 || target > self.max_amount {
            return Err(Error::Validation(format!(
                "Target balance must be between 0 and {}",
                self.max_amount
            )));
        }
        Ok(())
    }

    /// Check reason length
    pub fn check_reason(&self, reason: Option<&str>) -> Result<()> {
        match reason {
            Some(text) if text.chars().count() > self.max_reason_len => Err(Error::Validation(
                format!("Reason must be at most {} characters", self.max_reason_len),
            )),
            _ => Ok(()),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("POINTS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(sync) = std::env::var("POINTS_SYNC_WRITES") {
            config.rocksdb.sync_writes = sync
                .parse()
                .map_err(|_| Error::Config(format!("POINTS_SYNC_WRITES is not a bool: {}", sync)))?;
        }

        Ok(config)
    }
}
