//! Deterministic index valuation
//!
//! `IndexValuator::compute` is a pure function of the basket, the symbol directory, the
//! live prices and the supplied timestamp. Constituents without a live price stay in the
//! snapshot but contribute nothing, and weights are never renormalized over the priced
//! subset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::directory::FeedDirectory;
use crate::types::{BasketSnapshot, IndexSnapshot, LivePriceTick, SnapshotConstituent};
use crate::DEFAULT_TOTAL_SUPPLY;

/// Read access to the latest live price per feed key
pub trait PriceLookup {
    fn live_price(&self, feed_key: &str) -> Option<f64>;
}

impl PriceLookup for HashMap<String, f64> {
    fn live_price(&self, feed_key: &str) -> Option<f64> {
        self.get(feed_key).copied()
    }
}

impl PriceLookup for HashMap<String, LivePriceTick> {
    fn live_price(&self, feed_key: &str) -> Option<f64> {
        self.get(feed_key).map(|tick| tick.price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexValuator {
    total_supply: f64,
}

impl Default for IndexValuator {
    fn default() -> Self {
        Self { total_supply: DEFAULT_TOTAL_SUPPLY }
    }
}

impl IndexValuator {
    pub fn new(total_supply: f64) -> Self {
        Self { total_supply }
    }

    pub fn total_supply(&self) -> f64 {
        self.total_supply
    }

    /// Compute a snapshot. Returns `None` for an empty basket.
    pub fn compute<P>(
        &self,
        basket: &BasketSnapshot,
        directory: &FeedDirectory,
        prices: &P,
        at: DateTime<Utc>,
    ) -> Option<IndexSnapshot>
    where
        P: PriceLookup + ?Sized,
    {
        if basket.is_empty() {
            return None;
        }

        let mut rows = Vec::with_capacity(basket.constituents.len());
        let mut total_market_cap = 0.0;

        for constituent in &basket.constituents {
            let circulating_supply = constituent.circulating_supply();
            let feed_key = directory.lookup(&constituent.symbol).map(str::to_string);
            let live_price = feed_key.as_deref().and_then(|key| prices.live_price(key));
            let live_market_cap = live_price.map(|price| price * circulating_supply);

            if let Some(cap) = live_market_cap {
                total_market_cap += cap;
            }

            rows.push(SnapshotConstituent {
                id: constituent.id,
                name: constituent.name.clone(),
                symbol: constituent.symbol.clone(),
                circulating_supply,
                feed_key,
                live_price,
                live_market_cap,
                weight_percent: None,
            });
        }

        let index_price = if total_market_cap > 0.0 {
            for row in rows.iter_mut() {
                row.weight_percent = row.live_market_cap.map(|cap| cap / total_market_cap * 100.0);
            }
            total_market_cap / self.total_supply * 100.0
        } else {
            0.0
        };

        debug!(
            token = %basket.token,
            constituents = rows.len(),
            index_price,
            "Computed index snapshot"
        );

        Some(IndexSnapshot {
            token: basket.token.clone(),
            index_price,
            timestamp: at,
            constituents: rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConstituentRef;

    fn constituent(id: u64, symbol: &str, price: f64, market_cap: f64) -> ConstituentRef {
        ConstituentRef {
            id,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            reference_price: price,
            reference_market_cap: market_cap,
        }
    }

    fn directory() -> FeedDirectory {
        FeedDirectory::from_entries([
            ("Crypto.BTC/USD", "btc-feed"),
            ("Crypto.ETH/USD", "eth-feed"),
            ("Crypto.SOL/USD", "sol-feed"),
        ])
    }

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_single_constituent_valuation() {
        let basket = BasketSnapshot::new("TOP10", vec![constituent(1, "BTC", 50_000.0, 1e12)]);
        let prices = HashMap::from([("btc-feed".to_string(), 60_000.0)]);

        let snapshot = IndexValuator::default()
            .compute(&basket, &directory(), &prices, at())
            .unwrap();

        let row = &snapshot.constituents[0];
        assert_eq!(row.circulating_supply, 2e7);
        assert_eq!(row.live_market_cap, Some(1.2e12));
        assert_eq!(row.weight_percent, Some(100.0));
        assert!((snapshot.index_price - 4.8).abs() < 1e-9);
        assert_eq!(snapshot.timestamp, at());
    }

    #[test]
    fn test_partial_pricing_is_not_renormalized() {
        let basket = BasketSnapshot::new(
            "TOP10",
            vec![constituent(1, "BTC", 50_000.0, 1e12), constituent(2, "ETH", 3_000.0, 3.6e11)],
        );
        let prices = HashMap::from([("btc-feed".to_string(), 60_000.0)]);

        let snapshot = IndexValuator::default()
            .compute(&basket, &directory(), &prices, at())
            .unwrap();

        assert_eq!(snapshot.constituents.len(), 2);
        assert_eq!(snapshot.constituents[0].weight_percent, Some(100.0));
        assert_eq!(snapshot.constituents[1].live_price, None);
        assert_eq!(snapshot.constituents[1].weight_percent, None);
        assert_eq!(snapshot.constituents[1].feed_key.as_deref(), Some("eth-feed"));
    }

    #[test]
    fn test_empty_basket_yields_nothing() {
        let basket = BasketSnapshot::new("TOP10", vec![]);
        let prices: HashMap<String, f64> = HashMap::new();
        assert!(IndexValuator::default().compute(&basket, &directory(), &prices, at()).is_none());
    }

    #[test]
    fn test_no_live_prices_gives_zero_price_and_no_weights() {
        let basket = BasketSnapshot::new(
            "TOP10",
            vec![constituent(1, "BTC", 50_000.0, 1e12), constituent(9, "XYZ", 1.0, 1e6)],
        );
        let prices: HashMap<String, f64> = HashMap::new();

        let snapshot = IndexValuator::default()
            .compute(&basket, &directory(), &prices, at())
            .unwrap();

        assert_eq!(snapshot.index_price, 0.0);
        assert!(snapshot.constituents.iter().all(|c| c.weight_percent.is_none()));
        assert_eq!(snapshot.constituents[1].feed_key, None);
        assert_eq!(snapshot.total_weight_percent(), None);
    }

    #[test]
    fn test_weights_sum_to_one_hundred() {
        let basket = BasketSnapshot::new(
            "TOP10",
            vec![
                constituent(1, "BTC", 50_000.0, 1e12),
                constituent(2, "ETH", 3_000.0, 3.6e11),
                constituent(3, "SOL", 150.0, 7e10),
            ],
        );
        let prices = HashMap::from([
            ("btc-feed".to_string(), 61_234.5),
            ("eth-feed".to_string(), 3_111.1),
            ("sol-feed".to_string(), 149.9),
        ]);

        let snapshot = IndexValuator::default()
            .compute(&basket, &directory(), &prices, at())
            .unwrap();

        let total = snapshot.total_weight_percent().unwrap();
        assert!((99.99..=100.01).contains(&total));
        for row in &snapshot.constituents {
            assert_eq!(row.weight_percent.is_some(), row.live_market_cap.is_some());
        }
    }

    #[test]
    fn test_recompute_is_identical() {
        let basket = BasketSnapshot::new(
            "TOP10",
            vec![constituent(1, "BTC", 50_000.0, 1e12), constituent(3, "SOL", 150.0, 7e10)],
        );
        let prices = HashMap::from([
            ("btc-feed".to_string(), 60_000.0),
            ("sol-feed".to_string(), 151.0),
        ]);
        let valuator = IndexValuator::new(1e12);

        let first = valuator.compute(&basket, &directory(), &prices, at()).unwrap();
        let second = valuator.compute(&basket, &directory(), &prices, at()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_tick_map_lookup() {
        let basket = BasketSnapshot::new("TOP10", vec![constituent(1, "BTC", 50_000.0, 1e12)]);
        let ticks = HashMap::from([(
            "btc-feed".to_string(),
            LivePriceTick { feed_key: "btc-feed".to_string(), price: 55_000.0, observed_at: at() },
        )]);

        let snapshot = IndexValuator::default()
            .compute(&basket, &directory(), &ticks, at())
            .unwrap();
        assert_eq!(snapshot.constituents[0].live_price, Some(55_000.0));
    }
}
