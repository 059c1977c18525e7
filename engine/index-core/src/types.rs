//! Type definitions shared by the valuation pipeline and the rebalance engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider-assigned identity of a constituent (stable across refreshes)
pub type ConstituentId = u64;

/// One asset of a basket as reported by the market-data provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstituentRef {
    pub id: ConstituentId,
    pub symbol: String,
    pub name: String,
    pub reference_price: f64,
    pub reference_market_cap: f64,
}

impl ConstituentRef {
    /// Units in circulation implied by the reference quote
    pub fn circulating_supply(&self) -> f64 {
        if self.reference_price == 0.0 {
            0.0
        } else {
            self.reference_market_cap / self.reference_price
        }
    }
}

/// The full constituent list of one index product at one refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketSnapshot {
    pub token: String,
    pub fetched_at: DateTime<Utc>,
    pub constituents: Vec<ConstituentRef>,
}

impl BasketSnapshot {
    pub fn new(token: impl Into<String>, constituents: Vec<ConstituentRef>) -> Self {
        Self { token: token.into(), fetched_at: Utc::now(), constituents }
    }

    pub fn is_empty(&self) -> bool {
        self.constituents.is_empty()
    }

    pub fn ids(&self) -> Vec<ConstituentId> {
        self.constituents.iter().map(|c| c.id).collect()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.constituents.iter().map(|c| c.symbol.as_str())
    }
}

/// A single normalized oracle price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePriceTick {
    pub feed_key: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Per-constituent row of an index snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConstituent {
    pub id: ConstituentId,
    pub name: String,
    pub symbol: String,
    pub circulating_supply: f64,
    #[serde(rename = "pythFeedId", default, skip_serializing_if = "Option::is_none")]
    pub feed_key: Option<String>,
    #[serde(rename = "currentPrice", default, skip_serializing_if = "Option::is_none")]
    pub live_price: Option<f64>,
    #[serde(rename = "currentMarketCap", default, skip_serializing_if = "Option::is_none")]
    pub live_market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_percent: Option<f64>,
}

/// Complete computed state of an index at one instant.
///
/// Serialized shape: `{token, tokenPrice, timestamp, data: [...]}` with the timestamp
/// in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub token: String,
    #[serde(rename = "tokenPrice")]
    pub index_price: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "data")]
    pub constituents: Vec<SnapshotConstituent>,
}

impl IndexSnapshot {
    /// Live price of a constituent, if the feed has delivered one
    pub fn live_price_of(&self, id: ConstituentId) -> Option<f64> {
        self.constituents.iter().find(|c| c.id == id).and_then(|c| c.live_price)
    }

    pub fn total_weight_percent(&self) -> Option<f64> {
        let weights: Vec<f64> = self.constituents.iter().filter_map(|c| c.weight_percent).collect();
        if weights.is_empty() {
            None
        } else {
            Some(weights.iter().sum())
        }
    }

    /// Token/weight view derived from this snapshot
    pub fn composition(&self) -> Composition {
        Composition {
            token: self.token.clone(),
            composition: self
                .constituents
                .iter()
                .map(|c| CompositionEntry {
                    id: c.id,
                    name: c.name.clone(),
                    symbol: c.symbol.clone(),
                    weight_percent: c.weight_percent,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub token: String,
    pub composition: Vec<CompositionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionEntry {
    pub id: ConstituentId,
    pub name: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_percent: Option<f64>,
}

/// Quantity of one constituent backing a single index token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedToken {
    pub id: ConstituentId,
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub market_cap: f64,
    pub quantity: f64,
}

/// Immutable outcome of one rebalance cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceRecord {
    pub id: Uuid,
    pub token: String,
    pub timestamp: DateTime<Utc>,
    pub index_value_at_rebalance: f64,
    pub collateral_value_per_index_token: f64,
    pub allocated_tokens: Vec<AllocatedToken>,
    pub added: Vec<AllocatedToken>,
    pub removed: Vec<AllocatedToken>,
    pub retained: Vec<AllocatedToken>,
}

impl RebalanceRecord {
    pub fn constituent_ids(&self) -> Vec<ConstituentId> {
        self.allocated_tokens.iter().map(|t| t.id).collect()
    }

    pub fn quantity_of(&self, id: ConstituentId) -> Option<f64> {
        self.allocated_tokens.iter().find(|t| t.id == id).map(|t| t.quantity)
    }
}
