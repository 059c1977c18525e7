//! Owned state of one index product
//!
//! Live prices are last-arrival-wins per feed key. Every recomputation reads the current
//! basket, directory and price map under one lock so the cache always holds the result of
//! the latest full recompute.

use crate::cache::SnapshotCache;
use crate::error::{Result, ValuationError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use index_core::{
    BasketSnapshot, Composition, FeedDirectory, IndexSnapshot, IndexValuator, LivePriceTick,
    PriceLookup,
};
use price_feed::PriceTickHandler;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Live price per feed key
#[derive(Debug, Default)]
pub struct LivePriceMap {
    ticks: DashMap<String, LivePriceTick>,
}

impl LivePriceMap {
    pub fn insert(&self, tick: LivePriceTick) {
        self.ticks.insert(tick.feed_key.clone(), tick);
    }

    pub fn get(&self, feed_key: &str) -> Option<LivePriceTick> {
        self.ticks.get(feed_key).map(|entry| entry.value().clone())
    }

    pub fn retain_keys(&self, keys: &[String]) {
        self.ticks.retain(|key, _| keys.contains(key));
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn clear(&self) {
        self.ticks.clear();
    }
}

impl PriceLookup for LivePriceMap {
    fn live_price(&self, feed_key: &str) -> Option<f64> {
        self.ticks.get(feed_key).map(|entry| entry.price)
    }
}

/// Outcome of installing a new basket
#[derive(Debug, Clone, PartialEq)]
pub struct BasketChange {
    /// Feed keys resolved for the new basket, in basket order
    pub feed_keys: Vec<String>,
    /// Whether the key set differs from the one resolved at the previous install
    pub keys_changed: bool,
    /// Symbols with no oracle feed
    pub unmapped_symbols: Vec<String>,
}

pub struct IndexProduct {
    token: String,
    valuator: IndexValuator,
    live_prices: LivePriceMap,
    basket: RwLock<Option<BasketSnapshot>>,
    directory: RwLock<FeedDirectory>,
    /// Keys resolved by the last installed basket
    installed_keys: RwLock<Vec<String>>,
    cache: SnapshotCache,
    recompute_lock: Mutex<()>,
}

impl IndexProduct {
    pub fn new(token: impl Into<String>, total_supply: f64) -> Self {
        Self {
            token: token.into(),
            valuator: IndexValuator::new(total_supply),
            live_prices: LivePriceMap::default(),
            basket: RwLock::new(None),
            directory: RwLock::new(FeedDirectory::new()),
            installed_keys: RwLock::new(Vec::new()),
            cache: SnapshotCache::new(),
            recompute_lock: Mutex::new(()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub async fn latest(&self) -> Option<Arc<IndexSnapshot>> {
        self.cache.latest().await
    }

    pub async fn composition(&self) -> Option<Composition> {
        self.cache.composition().await
    }

    pub async fn basket(&self) -> Option<BasketSnapshot> {
        self.basket.read().await.clone()
    }

    pub fn live_price_count(&self) -> usize {
        self.live_prices.len()
    }

    /// Install a fresh symbol directory. An empty directory is ignored so a failed or
    /// truncated fetch keeps the previous mapping in place.
    pub async fn replace_directory(&self, directory: FeedDirectory) -> bool {
        if directory.is_empty() {
            warn!("[{}] Ignoring empty symbol directory", self.token);
            return false;
        }
        *self.directory.write().await = directory;
        true
    }

    /// Replace the basket wholesale and report the resolved feed keys
    pub async fn replace_basket(&self, basket: BasketSnapshot) -> Result<BasketChange> {
        if basket.token != self.token {
            return Err(ValuationError::TokenMismatch {
                expected: self.token.clone(),
                got: basket.token,
            });
        }
        if basket.is_empty() {
            return Err(ValuationError::EmptyBasket(self.token.clone()));
        }

        let (feed_keys, unmapped_symbols) = {
            let directory = self.directory.read().await;
            let mut keys = Vec::with_capacity(basket.constituents.len());
            let mut unmapped = Vec::new();
            for symbol in basket.symbols() {
                match directory.lookup(symbol) {
                    Some(key) => keys.push(key.to_string()),
                    None => unmapped.push(symbol.to_string()),
                }
            }
            (keys, unmapped)
        };

        if !unmapped_symbols.is_empty() {
            warn!(
                "[{}] {} constituents have no oracle feed: {:?}",
                self.token,
                unmapped_symbols.len(),
                unmapped_symbols
            );
        }

        *self.basket.write().await = Some(basket);
        self.live_prices.retain_keys(&feed_keys);

        let previous_keys =
            std::mem::replace(&mut *self.installed_keys.write().await, feed_keys.clone());
        let keys_changed = !same_key_set(&previous_keys, &feed_keys);
        info!(
            "[{}] Installed basket: {} feed keys (changed: {})",
            self.token,
            feed_keys.len(),
            keys_changed
        );

        self.recompute().await;

        Ok(BasketChange { feed_keys, keys_changed, unmapped_symbols })
    }

    /// Feed keys of the current basket under the current directory
    pub async fn feed_keys(&self) -> Vec<String> {
        let basket = self.basket.read().await;
        let directory = self.directory.read().await;
        match basket.as_ref() {
            Some(basket) => directory.resolve(basket.symbols()),
            None => Vec::new(),
        }
    }

    /// Apply ticks in arrival order, then recompute
    pub async fn apply_ticks(&self, ticks: &[LivePriceTick]) -> Option<Arc<IndexSnapshot>> {
        for tick in ticks {
            self.live_prices.insert(tick.clone());
        }
        self.recompute().await
    }

    pub async fn recompute(&self) -> Option<Arc<IndexSnapshot>> {
        self.recompute_at(Utc::now()).await
    }

    /// Recompute from current state. Leaves the cache untouched when there is no basket.
    pub async fn recompute_at(&self, at: DateTime<Utc>) -> Option<Arc<IndexSnapshot>> {
        let _guard = self.recompute_lock.lock().await;

        let snapshot = {
            let basket = self.basket.read().await;
            let directory = self.directory.read().await;
            let basket = basket.as_ref()?;
            self.valuator.compute(basket, &directory, &self.live_prices, at)?
        };

        debug!("[{}] Index price {:.6}", self.token, snapshot.index_price);

        Some(self.cache.replace(snapshot).await)
    }

    /// Drop all in-memory state
    pub async fn clear(&self) {
        self.cache.clear().await;
        self.live_prices.clear();
        *self.basket.write().await = None;
        self.installed_keys.write().await.clear();
        info!("[{}] Cleared valuation state", self.token);
    }
}

fn same_key_set(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

#[async_trait::async_trait]
impl PriceTickHandler for IndexProduct {
    async fn on_ticks(&self, ticks: &[LivePriceTick]) {
        self.apply_ticks(ticks).await;
    }
}
