use std::path::PathBuf;
use std::time::Duration;
use serde::Deserialize;
use crate::core::error::{Error, ErrorKind, Result};
use crate::writer::watcher::{Durability, WatcherConfig, DEFAULT_BATCH_SIZE};

/// Which document backend the engine opens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentBackend {
    /// Connection string of a clustered store, `host[N],host[M]`.
    Cluster(String),
    /// Connection string of a cursor-only store.
    Cursor(String),
    /// One JSON file per document under this directory.
    File(PathBuf),
}

impl DocumentBackend {
    /// Backend name without the connection string, which may hold credentials.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentBackend::Cluster(_) => "cluster",
            DocumentBackend::Cursor(_) => "cursor",
            DocumentBackend::File(_) => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemBackend {
    Local,
    Cluster(String),
}

impl MemBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            MemBackend::Local => "local",
            MemBackend::Cluster(_) => "cluster",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub document: DocumentBackend,
    pub mem: MemBackend,
    pub file_root: PathBuf,

    pub watcher_interval_secs: u64,     // WatcherConfig.time_range
    pub watcher_batch_size: usize,      // WatcherConfig.batch_size
    pub durability: Durability,         // WatcherConfig.durability

    pub query_cache_capacity: usize,    // compiled filters per document pool
}

impl Default for Config {
    fn default() -> Self {
        Config {
            document: DocumentBackend::File(PathBuf::from("./data/documents")),
            mem: MemBackend::Local,
            file_root: PathBuf::from("./data/files"),

            watcher_interval_secs: 1,
            watcher_batch_size: DEFAULT_BATCH_SIZE,
            durability: Durability::AtMostOnce,

            query_cache_capacity: 256,
        }
    }
}

impl Config {
    /// Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        if config.watcher_interval_secs == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "watcher_interval_secs must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            time_range: Duration::from_secs(self.watcher_interval_secs),
            batch_size: self.watcher_batch_size,
            durability: self.durability,
        }
    }
}
