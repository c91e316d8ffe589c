#[cfg(test)]
mod tests;

pub mod value;

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io, path::PathBuf};
use thiserror::Error;

/// Logical identifier for a 4096-byte page within one database file.
/// Examples:
/// - `let catalog_root = PageId(0);`
/// - `let data_page = PageId(42);`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Page id 0 doubles as the chain terminator; a `next` of zero ends a table.
    pub fn is_terminator(self) -> bool {
        self.0 == 0
    }
}

/// Opaque reference to a stored row, carrying the page-id hint that lets
/// update/delete rewrite the originating page without a full re-scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef {
    pub page: PageId,
}

impl RowRef {
    pub fn new(page: PageId) -> Self {
        Self { page }
    }
}

/// A row is a JSON object with arbitrary string-keyed fields; tables are
/// schema-less unless a schema record exists for them.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Canonical error type shared across database subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("out of space: {0}")]
    OutOfSpace(String),
    #[error("wal: {0}")]
    Wal(String),
    #[error("auth: {0}")]
    Auth(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// WAL sync policy: `Always` fsyncs at every commit marker, `Batch` defers
/// to explicit flushes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Always,
    Batch,
}

/// Write-ahead log settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Checkpoint (apply + truncate) after this many commits; 0 disables
    /// automatic checkpointing.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_mode: SyncMode::Always,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Runtime configuration for the server and the per-database storage stack.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./dbs"))
///     .port(4250)
///     .buffer_pages(512)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Address the TCP front-end binds to.
    #[builder(default = String::from("127.0.0.1"))]
    #[serde(default = "default_host")]
    pub host: String,
    #[builder(default = 4250)]
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding one `<name>.sawit` file (plus `.wal`/`.audit`) per database.
    #[builder(default = PathBuf::from("./data"))]
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Username -> `salt:sha256hex` entries; empty map disables authentication.
    #[builder(default)]
    #[serde(default)]
    pub auth: HashMap<String, String>,
    #[builder(default = 128)]
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[builder(default = 30_000)]
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[builder(default = String::from("info"))]
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[builder(default)]
    #[serde(default)]
    pub wal: WalConfig,
    /// Worker threads; defaults to the number of available CPUs.
    #[builder(default = available_cpus())]
    #[serde(default = "available_cpus")]
    pub worker_count: usize,
    /// Pages the buffer cache keeps resident per open database.
    #[builder(default = 256)]
    #[serde(default = "default_buffer_pages")]
    pub buffer_pages: usize,
    /// Decoded-row object cache entries per open database.
    #[builder(default = 64)]
    #[serde(default = "default_object_pages")]
    pub object_pages: usize,
}

impl Config {
    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> DbResult<()> {
        if self.worker_count == 0 {
            return Err(DbError::Protocol("worker_count must be at least 1".into()));
        }
        if self.buffer_pages == 0 || self.object_pages == 0 {
            return Err(DbError::Protocol("cache capacities must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(DbError::Protocol("max_connections must be at least 1".into()));
        }
        if self.query_timeout_ms == 0 {
            return Err(DbError::Protocol("query_timeout_ms must be positive".into()));
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(DbError::Protocol(format!("unknown log level '{other}'"))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

/// Returns the number of available CPUs.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_interval() -> u64 {
    128
}

fn default_host() -> String {
    String::from("127.0.0.1")
}

fn default_port() -> u16 {
    4250
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_connections() -> usize {
    128
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_buffer_pages() -> usize {
    256
}

fn default_object_pages() -> usize {
    64
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::value::{value_cmp, values_equal};
    pub use crate::{Config, DbError, DbResult, PageId, Row, RowRef, SyncMode, WalConfig};
}
