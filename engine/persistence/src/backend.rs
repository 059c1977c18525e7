//! Record store trait and the in-memory implementation

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, StoreError};
use crate::local::LocalRebalanceStore;
use index_core::RebalanceRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only history of rebalance records, keyed by index token
#[async_trait::async_trait]
pub trait RebalanceStore: Send + Sync {
    /// Durably append one record. A record id may only be stored once.
    async fn append(&self, record: &RebalanceRecord) -> Result<()>;

    /// Most recently appended record for a token
    async fn latest(&self, token: &str) -> Result<Option<RebalanceRecord>>;

    /// All records for a token, oldest first
    async fn history(&self, token: &str) -> Result<Vec<RebalanceRecord>>;

    fn backend_name(&self) -> &'static str;
}

/// Reject token names that are unusable as a directory name
pub fn validate_token(token: &str) -> Result<()> {
    let valid = !token.is_empty()
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::invalid_token(token))
    }
}

/// Build the store selected by the configuration
pub fn create_store(config: StoreConfig) -> Result<Arc<dyn RebalanceStore>> {
    config.validate().map_err(StoreError::config)?;

    match config.backend {
        StoreBackend::Local => Ok(Arc::new(LocalRebalanceStore::new(config)?)),
        StoreBackend::Memory => Ok(Arc::new(InMemoryRebalanceStore::new())),
    }
}

/// In-memory record store (for testing)
#[derive(Default)]
pub struct InMemoryRebalanceStore {
    records: Arc<Mutex<HashMap<String, Vec<RebalanceRecord>>>>,
}

impl InMemoryRebalanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RebalanceStore for InMemoryRebalanceStore {
    async fn append(&self, record: &RebalanceRecord) -> Result<()> {
        validate_token(&record.token)?;

        let mut records = self.records.lock().await;
        let history = records.entry(record.token.clone()).or_default();
        if history.iter().any(|r| r.id == record.id) {
            return Err(StoreError::already_exists(record.id.to_string()));
        }
        history.push(record.clone());

        tracing::debug!("Stored rebalance record {} for {} in memory", record.id, record.token);

        Ok(())
    }

    async fn latest(&self, token: &str) -> Result<Option<RebalanceRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(token).and_then(|history| history.last().cloned()))
    }

    async fn history(&self, token: &str) -> Result<Vec<RebalanceRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(token).cloned().unwrap_or_default())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(token: &str, value: f64) -> RebalanceRecord {
        RebalanceRecord {
            id: Uuid::new_v4(),
            token: token.to_string(),
            timestamp: Utc::now(),
            index_value_at_rebalance: value,
            collateral_value_per_index_token: value,
            allocated_tokens: vec![],
            added: vec![],
            removed: vec![],
            retained: vec![],
        }
    }

    #[test]
    fn test_validate_token() {
        assert!(validate_token("TOP10").is_ok());
        assert!(validate_token("defi_5-v2").is_ok());
        assert!(validate_token("").is_err());
        assert!(validate_token("../etc").is_err());
        assert!(validate_token("a/b").is_err());
    }

    #[tokio::test]
    async fn test_in_memory_append_and_latest() {
        let store = InMemoryRebalanceStore::new();
        assert!(store.latest("TOP10").await.unwrap().is_none());

        let first = record("TOP10", 1.0);
        let second = record("TOP10", 2.0);
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();
        store.append(&record("DEFI5", 9.0)).await.unwrap();

        let latest = store.latest("TOP10").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let history = store.history("TOP10").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate_id() {
        let store = InMemoryRebalanceStore::new();
        let rec = record("TOP10", 1.0);
        store.append(&rec).await.unwrap();

        let err = store.append(&rec).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.history("TOP10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(StoreConfig::in_memory()).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
