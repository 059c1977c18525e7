//! Local file-based record store
//!
//! Layout: `{data_dir}/{token}/record_{sequence:08}_{id}.json`. Each append writes a
//! hidden temp file first and renames it into place, so readers never observe a partial
//! record.

use crate::backend::{validate_token, RebalanceStore};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use index_core::RebalanceRecord;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Information about one record file on disk
#[derive(Debug, Clone)]
struct RecordFileInfo {
    path: PathBuf,
    sequence: u64,
    record_id: Uuid,
}

pub struct LocalRebalanceStore {
    config: StoreConfig,
    append_lock: Mutex<()>,
}

impl LocalRebalanceStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(StoreError::Io)?;

        tracing::info!("Local rebalance store initialized at: {:?}", config.data_dir);

        Ok(Self { config, append_lock: Mutex::new(()) })
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StoreConfig::new(data_dir))
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    async fn list_record_files(&self, token: &str) -> Result<Vec<RecordFileInfo>> {
        let dir = self.config.token_dir(token);
        if !tokio::fs::try_exists(&dir).await.map_err(StoreError::Io)? {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(StoreError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::Io)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some((sequence, record_id)) = parse_record_file_name(name) {
                files.push(RecordFileInfo { path, sequence, record_id });
            }
        }

        files.sort_by_key(|f| f.sequence);
        Ok(files)
    }

    async fn read_record(path: &Path) -> Result<RebalanceRecord> {
        let bytes = tokio::fs::read(path).await.map_err(StoreError::Io)?;
        let record = serde_json::from_slice(&bytes).map_err(StoreError::Serialization)?;
        Ok(record)
    }

    async fn write_atomically(&self, dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let final_path = dir.join(file_name);
        let temp_path = dir.join(format!(".{file_name}.tmp"));

        let mut file = tokio::fs::File::create(&temp_path).await.map_err(StoreError::Io)?;
        file.write_all(bytes).await.map_err(StoreError::Io)?;
        file.flush().await.map_err(StoreError::Io)?;
        if self.config.fsync_on_append {
            file.sync_all().await.map_err(StoreError::Io)?;
        }
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Io(e));
        }

        Ok(final_path)
    }
}

fn record_file_name(sequence: u64, id: Uuid) -> String {
    format!("record_{sequence:08}_{id}.json")
}

fn parse_record_file_name(name: &str) -> Option<(u64, Uuid)> {
    let stem = name.strip_prefix("record_")?.strip_suffix(".json")?;
    let (sequence, id) = stem.split_once('_')?;
    Some((sequence.parse().ok()?, Uuid::parse_str(id).ok()?))
}

#[async_trait::async_trait]
impl RebalanceStore for LocalRebalanceStore {
    async fn append(&self, record: &RebalanceRecord) -> Result<()> {
        validate_token(&record.token)?;

        let _guard = self.append_lock.lock().await;

        let dir = self.config.token_dir(&record.token);
        tokio::fs::create_dir_all(&dir).await.map_err(StoreError::Io)?;

        let existing = self.list_record_files(&record.token).await?;
        if existing.iter().any(|f| f.record_id == record.id) {
            return Err(StoreError::already_exists(record.id.to_string()));
        }
        let sequence = existing.last().map(|f| f.sequence + 1).unwrap_or(1);

        let bytes = serde_json::to_vec_pretty(record).map_err(StoreError::Serialization)?;
        let path = self.write_atomically(&dir, &record_file_name(sequence, record.id), &bytes).await?;

        tracing::info!(
            "Appended rebalance record {} for {} (sequence {}, {} bytes) at {:?}",
            record.id,
            record.token,
            sequence,
            bytes.len(),
            path
        );

        Ok(())
    }

    async fn latest(&self, token: &str) -> Result<Option<RebalanceRecord>> {
        validate_token(token)?;

        // An unreadable newest record is an error, never a reason to serve an older one
        let files = self.list_record_files(token).await?;
        match files.last() {
            Some(info) => Self::read_record(&info.path).await.map(Some),
            None => Ok(None),
        }
    }

    async fn history(&self, token: &str) -> Result<Vec<RebalanceRecord>> {
        validate_token(token)?;

        let files = self.list_record_files(token).await?;
        let mut records = Vec::with_capacity(files.len());
        for info in &files {
            match Self::read_record(&info.path).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable rebalance record {:?}: {}", info.path, e);
                }
            }
        }

        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
