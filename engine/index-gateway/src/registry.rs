//! Products served by the gateway, keyed by index token

use crate::broadcaster::SnapshotBroadcaster;
use index_valuation::IndexProduct;
use price_feed::{FeedMetricsSnapshot, FeedState, LivePriceFeed};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the gateway needs to serve one product
#[derive(Clone)]
pub struct ProductEndpoint {
    pub product: Arc<IndexProduct>,
    pub broadcaster: Arc<SnapshotBroadcaster>,
    pub feed: Option<Arc<LivePriceFeed>>,
}

impl ProductEndpoint {
    pub fn new(product: Arc<IndexProduct>, feed: Option<Arc<LivePriceFeed>>) -> Self {
        let broadcaster =
            Arc::new(SnapshotBroadcaster::new(product.token(), product.cache().clone()));
        Self { product, broadcaster, feed }
    }

    pub fn token(&self) -> &str {
        self.product.token()
    }

    pub async fn health(&self) -> ProductHealth {
        let latest = self.product.latest().await;
        ProductHealth {
            token: self.token().to_string(),
            snapshot_available: latest.is_some(),
            index_price: latest.as_ref().map(|s| s.index_price),
            last_update: latest.as_ref().map(|s| s.timestamp.to_rfc3339()),
            live_prices: self.product.live_price_count(),
            subscribers: self.broadcaster.client_count().await,
            feed_state: self.feed.as_ref().map(|f| f.state()),
            feed_metrics: self.feed.as_ref().map(|f| f.metrics()),
        }
    }
}

/// Per-product section of the health report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductHealth {
    pub token: String,
    pub snapshot_available: bool,
    pub index_price: Option<f64>,
    pub last_update: Option<String>,
    pub live_prices: usize,
    pub subscribers: usize,
    pub feed_state: Option<FeedState>,
    pub feed_metrics: Option<FeedMetricsSnapshot>,
}

#[derive(Clone, Default)]
pub struct ProductRegistry {
    products: BTreeMap<String, ProductEndpoint>,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: ProductEndpoint) {
        self.products.insert(endpoint.token().to_string(), endpoint);
    }

    pub fn get(&self, token: &str) -> Option<&ProductEndpoint> {
        self.products.get(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.products.contains_key(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ProductEndpoint> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
