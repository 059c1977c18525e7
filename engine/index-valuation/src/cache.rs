//! Latest computed snapshot of one index product

use index_core::{Composition, IndexSnapshot};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds the most recent snapshot. Not a TTL cache: entries only change on recomputation
/// and are dropped on shutdown.
#[derive(Debug, Default, Clone)]
pub struct SnapshotCache {
    latest: Arc<RwLock<Option<Arc<IndexSnapshot>>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self) -> Option<Arc<IndexSnapshot>> {
        self.latest.read().await.clone()
    }

    /// Token/weight view of the latest snapshot
    pub async fn composition(&self) -> Option<Composition> {
        self.latest.read().await.as_ref().map(|snapshot| snapshot.composition())
    }

    pub async fn replace(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.latest.write().await = Some(snapshot.clone());
        snapshot
    }

    pub async fn clear(&self) {
        *self.latest.write().await = None;
    }
}
