//! Configuration for the record store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which store implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON files on local disk
    Local,
    /// Process memory only (tests, dry runs)
    Memory,
}

/// Configuration for the record store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Base directory; each token gets its own subdirectory
    pub data_dir: PathBuf,

    /// Whether to fsync each record before the rename
    pub fsync_on_append: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            data_dir: PathBuf::from("./data/rebalances"),
            fsync_on_append: true,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Default::default() }
    }

    pub fn in_memory() -> Self {
        Self { backend: StoreBackend::Memory, ..Default::default() }
    }

    /// Directory holding one token's records
    pub fn token_dir(&self, token: &str) -> PathBuf {
        self.data_dir.join(token)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backend == StoreBackend::Local && self.data_dir.as_os_str().is_empty() {
            return Err("Store data_dir must not be empty".to_string());
        }

        Ok(())
    }
}
