//! Collaborators the rebalance cycle reads from

use crate::error::{RebalanceError, Result};
use async_trait::async_trait;
use index_core::{BasketSnapshot, IndexSnapshot};
use index_valuation::IndexProduct;
use market_data::{BasketCriteria, BasketRefresher};
use std::collections::HashMap;
use std::sync::Arc;

/// Collateral base per index token, priced externally
#[async_trait]
pub trait CollateralPricing: Send + Sync {
    async fn collateral_base(&self, token: &str) -> Result<f64>;
}

/// Configured collateral base per token
#[derive(Debug, Clone, Default)]
pub struct FixedCollateral {
    bases: HashMap<String, f64>,
}

impl FixedCollateral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, token: impl Into<String>, base: f64) -> Self {
        self.bases.insert(token.into(), base);
        self
    }
}

#[async_trait]
impl CollateralPricing for FixedCollateral {
    async fn collateral_base(&self, token: &str) -> Result<f64> {
        self.bases
            .get(token)
            .copied()
            .ok_or_else(|| RebalanceError::Collateral(format!("No collateral base for {}", token)))
    }
}

/// Fresh top-N candidates for a product
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, criteria: &BasketCriteria) -> Result<BasketSnapshot>;
}

#[async_trait]
impl CandidateSource for BasketRefresher {
    async fn candidates(&self, criteria: &BasketCriteria) -> Result<BasketSnapshot> {
        Ok(self.fetch_candidates(criteria).await?)
    }
}

/// Latest live valuation of a product
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn latest_snapshot(&self) -> Option<Arc<IndexSnapshot>>;
}

#[async_trait]
impl SnapshotSource for IndexProduct {
    async fn latest_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.latest().await
    }
}
