use crate::calculator::{allocate, collateral_growth, diff};
use crate::error::{RebalanceError, Result};
use crate::sources::{CandidateSource, CollateralPricing, SnapshotSource};
use chrono::Utc;
use index_core::{BasketSnapshot, RebalanceRecord};
use market_data::BasketCriteria;
use persistence::RebalanceStore;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs rebalance cycles for one index product
pub struct RebalanceEngine {
    criteria: BasketCriteria,
    store: Arc<dyn RebalanceStore>,
    candidates: Arc<dyn CandidateSource>,
    snapshots: Arc<dyn SnapshotSource>,
    collateral: Arc<dyn CollateralPricing>,
}

impl RebalanceEngine {
    pub fn new(
        criteria: BasketCriteria,
        store: Arc<dyn RebalanceStore>,
        candidates: Arc<dyn CandidateSource>,
        snapshots: Arc<dyn SnapshotSource>,
        collateral: Arc<dyn CollateralPricing>,
    ) -> Self {
        Self { criteria, store, candidates, snapshots, collateral }
    }

    pub fn token(&self) -> &str {
        &self.criteria.token
    }

    /// One scheduled cycle. On any abort the previous record stays current.
    pub async fn run(&self) -> Result<RebalanceRecord> {
        match self.rebalance().await {
            Ok(record) => {
                info!(
                    token = %self.token(),
                    added = record.added.len(),
                    removed = record.removed.len(),
                    retained = record.retained.len(),
                    "Rebalance complete: collateral {:.6} per index token",
                    record.collateral_value_per_index_token
                );
                Ok(record)
            }
            Err(e) => {
                warn!(token = %self.token(), "Rebalance aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn rebalance(&self) -> Result<RebalanceRecord> {
        let token = self.token().to_string();

        // Prior state
        let prior = self
            .store
            .latest(&token)
            .await?
            .ok_or_else(|| RebalanceError::MissingPriorRecord(token.clone()))?;
        let snapshot = self
            .snapshots
            .latest_snapshot()
            .await
            .ok_or_else(|| RebalanceError::MissingLiveSnapshot(token.clone()))?;

        // Collateral value
        let growth = collateral_growth(&prior, &snapshot);
        if growth.matched == 0 && !prior.allocated_tokens.is_empty() {
            return Err(RebalanceError::NoLivePrices(token));
        }
        if growth.unmatched > 0 {
            warn!(
                token = %token,
                "{} held constituents have no live price and are left out of the growth average",
                growth.unmatched
            );
        }
        let base = self.collateral.collateral_base(&token).await?;
        let collateral = base + growth.average_value;

        // Basket
        let candidates = self.fresh_candidates().await?;

        // Allocation and diff
        let allocated_tokens = allocate(&candidates, collateral);
        let diff = diff(&prior.allocated_tokens, &allocated_tokens);

        let record = RebalanceRecord {
            id: Uuid::new_v4(),
            token,
            timestamp: Utc::now(),
            index_value_at_rebalance: snapshot.index_price,
            collateral_value_per_index_token: collateral,
            allocated_tokens,
            added: diff.added,
            removed: diff.removed,
            retained: diff.retained,
        };

        self.store.append(&record).await?;
        Ok(record)
    }

    /// Write the first record for a product with no history.
    ///
    /// Collateral is the base alone and every constituent is `added`.
    pub async fn bootstrap(&self) -> Result<RebalanceRecord> {
        let token = self.token().to_string();

        if self.store.latest(&token).await?.is_some() {
            return Err(RebalanceError::AlreadyBootstrapped(token));
        }

        let collateral = self.collateral.collateral_base(&token).await?;
        let candidates = self.fresh_candidates().await?;
        let index_value = self.snapshots.latest_snapshot().await.map(|s| s.index_price).unwrap_or(0.0);

        let allocated_tokens = allocate(&candidates, collateral);
        let record = RebalanceRecord {
            id: Uuid::new_v4(),
            token: token.clone(),
            timestamp: Utc::now(),
            index_value_at_rebalance: index_value,
            collateral_value_per_index_token: collateral,
            added: allocated_tokens.clone(),
            allocated_tokens,
            removed: Vec::new(),
            retained: Vec::new(),
        };

        self.store.append(&record).await?;
        info!(token = %token, "Bootstrapped with {} constituents", record.allocated_tokens.len());
        Ok(record)
    }

    async fn fresh_candidates(&self) -> Result<BasketSnapshot> {
        let candidates = self.candidates.candidates(&self.criteria).await?;
        if candidates.is_empty() {
            return Err(RebalanceError::EmptyCandidateBasket(self.token().to_string()));
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::FixedCollateral;
    use async_trait::async_trait;
    use index_core::{AllocatedToken, ConstituentRef, IndexSnapshot, SnapshotConstituent};
    use persistence::{InMemoryRebalanceStore, StoreError};

    struct FakeCandidates(Vec<ConstituentRef>);

    #[async_trait]
    impl CandidateSource for FakeCandidates {
        async fn candidates(&self, criteria: &BasketCriteria) -> Result<BasketSnapshot> {
            Ok(BasketSnapshot::new(criteria.token.clone(), self.0.clone()))
        }
    }

    struct FakeSnapshots(Option<Arc<IndexSnapshot>>);

    #[async_trait]
    impl SnapshotSource for FakeSnapshots {
        async fn latest_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
            self.0.clone()
        }
    }

    fn constituent(id: u64, symbol: &str, price: f64, market_cap: f64) -> ConstituentRef {
        ConstituentRef {
            id,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            reference_price: price,
            reference_market_cap: market_cap,
        }
    }

    fn held(id: u64, symbol: &str, quantity: f64) -> AllocatedToken {
        AllocatedToken {
            id,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price: 1.0,
            market_cap: 1.0,
            quantity,
        }
    }

    fn prior_record() -> RebalanceRecord {
        let tokens = vec![held(1, "A", 2.0), held(2, "B", 3.0)];
        RebalanceRecord {
            id: Uuid::new_v4(),
            token: "TOP10".to_string(),
            timestamp: Utc::now(),
            index_value_at_rebalance: 1.0,
            collateral_value_per_index_token: 100.0,
            allocated_tokens: tokens.clone(),
            added: tokens,
            removed: vec![],
            retained: vec![],
        }
    }

    fn live_snapshot() -> Arc<IndexSnapshot> {
        let entry = |id: u64, symbol: &str, price: f64| SnapshotConstituent {
            id,
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            circulating_supply: 1.0,
            feed_key: Some(format!("feed{id}")),
            live_price: Some(price),
            live_market_cap: Some(price),
            weight_percent: None,
        };
        Arc::new(IndexSnapshot {
            token: "TOP10".to_string(),
            index_price: 7.5,
            timestamp: Utc::now(),
            constituents: vec![entry(1, "A", 10.0), entry(2, "B", 20.0)],
        })
    }

    fn engine(
        store: Arc<InMemoryRebalanceStore>,
        candidates: Vec<ConstituentRef>,
        snapshot: Option<Arc<IndexSnapshot>>,
    ) -> RebalanceEngine {
        RebalanceEngine::new(
            BasketCriteria::new("TOP10", 10),
            store,
            Arc::new(FakeCandidates(candidates)),
            Arc::new(FakeSnapshots(snapshot)),
            Arc::new(FixedCollateral::new().with_base("TOP10", 100.0)),
        )
    }

    fn ids(tokens: &[AllocatedToken]) -> Vec<u64> {
        tokens.iter().map(|t| t.id).collect()
    }

    #[tokio::test]
    async fn test_rebalance_rotates_basket() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        store.append(&prior_record()).await.unwrap();

        let engine = engine(
            store.clone(),
            vec![constituent(2, "B", 20.0, 600.0), constituent(3, "C", 5.0, 400.0)],
            Some(live_snapshot()),
        );

        let record = engine.run().await.unwrap();

        // growth = avg(10*2, 20*3) = 40 on top of a base of 100
        assert!((record.collateral_value_per_index_token - 140.0).abs() < 1e-9);
        assert_eq!(record.index_value_at_rebalance, 7.5);
        assert_eq!(ids(&record.added), vec![3]);
        assert_eq!(ids(&record.removed), vec![1]);
        assert_eq!(ids(&record.retained), vec![2]);
        assert!((record.quantity_of(2).unwrap() - 4.2).abs() < 1e-9);
        assert!((record.quantity_of(3).unwrap() - 11.2).abs() < 1e-9);

        let value: f64 = record.allocated_tokens.iter().map(|t| t.quantity * t.price).sum();
        assert!((value - 140.0).abs() < 1e-9);

        let latest = store.latest("TOP10").await.unwrap().unwrap();
        assert_eq!(latest.id, record.id);
        assert_eq!(store.history("TOP10").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_prior_record_aborts() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        let engine = engine(store.clone(), vec![constituent(3, "C", 5.0, 400.0)], Some(live_snapshot()));

        let result = engine.run().await;
        assert!(matches!(result, Err(RebalanceError::MissingPriorRecord(_))));
        assert!(store.history("TOP10").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_snapshot_aborts() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        let prior = prior_record();
        store.append(&prior).await.unwrap();
        let engine = engine(store.clone(), vec![constituent(3, "C", 5.0, 400.0)], None);

        let result = engine.run().await;
        assert!(matches!(result, Err(RebalanceError::MissingLiveSnapshot(_))));
        assert_eq!(store.latest("TOP10").await.unwrap().unwrap().id, prior.id);
        assert_eq!(store.history("TOP10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_without_live_prices_aborts() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        let prior = prior_record();
        store.append(&prior).await.unwrap();

        // Basket installed but no tick has arrived yet
        let mut unpriced = (*live_snapshot()).clone();
        unpriced.index_price = 0.0;
        for entry in &mut unpriced.constituents {
            entry.live_price = None;
            entry.live_market_cap = None;
        }
        let engine =
            engine(store.clone(), vec![constituent(3, "C", 5.0, 400.0)], Some(Arc::new(unpriced)));

        let result = engine.run().await;
        assert!(matches!(result, Err(RebalanceError::NoLivePrices(_))));
        assert_eq!(store.latest("TOP10").await.unwrap().unwrap().id, prior.id);
        assert_eq!(store.history("TOP10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partially_priced_snapshot_still_rebalances() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        store.append(&prior_record()).await.unwrap();

        let mut partial = (*live_snapshot()).clone();
        partial.constituents[1].live_price = None;
        partial.constituents[1].live_market_cap = None;
        let engine =
            engine(store.clone(), vec![constituent(3, "C", 5.0, 400.0)], Some(Arc::new(partial)));

        // Only A is matched: growth = 10 * 2
        let record = engine.run().await.unwrap();
        assert!((record.collateral_value_per_index_token - 120.0).abs() < 1e-9);
        assert_eq!(store.history("TOP10").await.unwrap().len(), 2);
    }

    /// Store whose newest record cannot be read
    #[derive(Default)]
    struct UnreadableStore {
        appends: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RebalanceStore for UnreadableStore {
        async fn append(&self, _record: &RebalanceRecord) -> persistence::Result<()> {
            self.appends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn latest(&self, _token: &str) -> persistence::Result<Option<RebalanceRecord>> {
            Err(StoreError::corruption("truncated record"))
        }

        async fn history(&self, _token: &str) -> persistence::Result<Vec<RebalanceRecord>> {
            Ok(Vec::new())
        }

        fn backend_name(&self) -> &'static str {
            "unreadable"
        }
    }

    #[tokio::test]
    async fn test_unreadable_prior_record_aborts() {
        let store = Arc::new(UnreadableStore::default());
        let engine = RebalanceEngine::new(
            BasketCriteria::new("TOP10", 10),
            store.clone(),
            Arc::new(FakeCandidates(vec![constituent(3, "C", 5.0, 400.0)])),
            Arc::new(FakeSnapshots(Some(live_snapshot()))),
            Arc::new(FixedCollateral::new().with_base("TOP10", 100.0)),
        );

        assert!(matches!(engine.run().await, Err(RebalanceError::Store(_))));
        assert!(matches!(engine.bootstrap().await, Err(RebalanceError::Store(_))));
        assert_eq!(store.appends.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_candidates_abort() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        store.append(&prior_record()).await.unwrap();
        let engine = engine(store.clone(), vec![], Some(live_snapshot()));

        let result = engine.run().await;
        assert!(matches!(result, Err(RebalanceError::EmptyCandidateBasket(_))));
        assert_eq!(store.history("TOP10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_collateral_base_aborts() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        store.append(&prior_record()).await.unwrap();
        let engine = RebalanceEngine::new(
            BasketCriteria::new("TOP10", 10),
            store.clone(),
            Arc::new(FakeCandidates(vec![constituent(3, "C", 5.0, 400.0)])),
            Arc::new(FakeSnapshots(Some(live_snapshot()))),
            Arc::new(FixedCollateral::new()),
        );

        assert!(matches!(engine.run().await, Err(RebalanceError::Collateral(_))));
        assert_eq!(store.history("TOP10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_writes_first_record() {
        let store = Arc::new(InMemoryRebalanceStore::new());
        let engine = engine(
            store.clone(),
            vec![constituent(1, "A", 10.0, 750.0), constituent(2, "B", 20.0, 250.0)],
            None,
        );

        let record = engine.bootstrap().await.unwrap();
        assert_eq!(record.collateral_value_per_index_token, 100.0);
        assert_eq!(record.index_value_at_rebalance, 0.0);
        assert_eq!(ids(&record.added), vec![1, 2]);
        assert!(record.removed.is_empty());
        assert!(record.retained.is_empty());
        assert!((record.quantity_of(1).unwrap() - 7.5).abs() < 1e-9);

        let again = engine.bootstrap().await;
        assert!(matches!(again, Err(RebalanceError::AlreadyBootstrapped(_))));
        assert_eq!(store.history("TOP10").await.unwrap().len(), 1);
    }
}
