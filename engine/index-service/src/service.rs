//! Service state management and component initialization

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ProductConfig, ServiceConfig};
use index_core::FeedDirectory;
use index_gateway::{IndexGateway, ProductEndpoint, ProductRegistry};
use index_valuation::IndexProduct;
use market_data::{BasketRefresher, CoinMarketCapClient, MarketDataProvider};
use persistence::{create_store, RebalanceStore};
use price_feed::{HermesConnector, HermesDirectoryClient, LivePriceFeed, OracleConnector, SymbolDirectorySource};
use rebalance_engine::{next_weekly_run, FixedCollateral, RebalanceEngine, RebalanceError};

/// External systems the service talks to
pub struct Collaborators {
    pub store: Arc<dyn RebalanceStore>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub connector: Arc<dyn OracleConnector>,
    pub directory: Arc<dyn SymbolDirectorySource>,
}

impl Collaborators {
    /// Production collaborators: file store, CoinMarketCap and Pyth Hermes
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let store = create_store(config.store.clone()).context("Failed to create record store")?;
        let provider = CoinMarketCapClient::new(&config.market_data)
            .context("Failed to create market-data client")?;
        let directory = HermesDirectoryClient::new(&config.feed)
            .context("Failed to create symbol directory client")?;

        Ok(Self {
            store,
            provider: Arc::new(provider),
            connector: Arc::new(HermesConnector::new(&config.feed)),
            directory: Arc::new(directory),
        })
    }
}

/// Live state and jobs of one index product
pub struct ProductRuntime {
    pub config: ProductConfig,
    pub product: Arc<IndexProduct>,
    pub feed: Arc<LivePriceFeed>,
    pub engine: RebalanceEngine,
}

impl ProductRuntime {
    pub fn token(&self) -> &str {
        &self.config.token
    }
}

/// Service state containing all initialized components
pub struct ServiceState {
    /// Service configuration
    pub config: ServiceConfig,

    store: Arc<dyn RebalanceStore>,
    refresher: Arc<BasketRefresher>,
    directory_source: Arc<dyn SymbolDirectorySource>,
    products: Vec<Arc<ProductRuntime>>,
    gateway: IndexGateway,

    /// Flipped once to stop every periodic job
    shutdown_tx: watch::Sender<bool>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    is_shut_down: AtomicBool,
}

impl ServiceState {
    /// Create a new service state with production collaborators
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service components...");
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(config, collaborators))
    }

    pub fn with_collaborators(config: ServiceConfig, collaborators: Collaborators) -> Self {
        let refresher =
            Arc::new(BasketRefresher::new(collaborators.provider.clone(), &config.market_data));

        let mut registry = ProductRegistry::new();
        let mut products = Vec::with_capacity(config.products.len());

        for product_config in &config.products {
            let token = product_config.token.clone();
            let product = Arc::new(IndexProduct::new(token.clone(), product_config.total_supply));
            let feed = Arc::new(LivePriceFeed::new(
                token.clone(),
                &config.feed,
                collaborators.connector.clone(),
                product.clone(),
            ));
            let collateral =
                FixedCollateral::new().with_base(token.clone(), product_config.rebalance.collateral_base);
            let engine = RebalanceEngine::new(
                product_config.criteria(),
                collaborators.store.clone(),
                refresher.clone(),
                product.clone(),
                Arc::new(collateral),
            );

            registry.register(ProductEndpoint::new(product.clone(), Some(feed.clone())));
            products.push(Arc::new(ProductRuntime {
                config: product_config.clone(),
                product,
                feed,
                engine,
            }));

            info!("Initialized product {}", token);
        }

        let gateway = IndexGateway::new(config.gateway.clone(), Arc::new(registry));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            store: collaborators.store,
            refresher,
            directory_source: collaborators.directory,
            products,
            gateway,
            shutdown_tx,
            jobs: Mutex::new(Vec::new()),
            is_shut_down: AtomicBool::new(false),
        }
    }

    pub fn products(&self) -> &[Arc<ProductRuntime>] {
        &self.products
    }

    pub fn product(&self, token: &str) -> Option<&Arc<ProductRuntime>> {
        self.products.iter().find(|runtime| runtime.token() == token)
    }

    /// Initial refresh, then the periodic jobs and the gateway
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting index service with {} products", self.products.len());

        self.refresh_all().await;

        let mut jobs = vec![self.spawn_refresh_job()];
        for runtime in &self.products {
            if runtime.config.rebalance.enabled {
                jobs.push(self.spawn_rebalance_job(runtime.clone())?);
            } else {
                info!("[{}] Scheduled rebalancing disabled", runtime.token());
            }
        }

        let gateway_tasks =
            self.gateway.start(self.shutdown_tx.subscribe()).await.context("Failed to start gateway")?;
        jobs.extend(gateway_tasks);

        self.jobs.lock().await.extend(jobs);
        info!("Index service started");
        Ok(())
    }

    /// Refresh the symbol directory once, then every product's basket
    pub async fn refresh_all(&self) {
        let directory = match self.directory_source.fetch_directory().await {
            Ok(directory) => Some(directory),
            Err(e) => {
                warn!("Symbol directory refresh failed, keeping previous mapping: {}", e);
                None
            }
        };

        for runtime in &self.products {
            if let Err(e) = self.refresh_product(runtime, directory.clone()).await {
                warn!("[{}] Basket refresh failed, keeping current basket: {:#}", runtime.token(), e);
            }
        }
    }

    /// Install a fresh basket for one product, seeded by its latest rebalance record, and
    /// restart the feed only when the resolved key set changed
    pub async fn refresh_product(
        &self,
        runtime: &ProductRuntime,
        directory: Option<FeedDirectory>,
    ) -> Result<()> {
        let token = runtime.token();

        if let Some(directory) = directory {
            let entries = directory.len();
            if runtime.product.replace_directory(directory).await {
                debug!("[{}] Symbol directory holds {} pairs", token, entries);
            }
        }

        let membership = self
            .store
            .latest(token)
            .await
            .context("Could not read latest rebalance record")?
            .map(|record| record.constituent_ids());

        let basket = self
            .refresher
            .refresh(&runtime.config.criteria(), membership.as_deref())
            .await
            .context("Market-data refresh failed")?;
        let change = runtime.product.replace_basket(basket).await?;

        let active_keys = runtime.feed.active_keys().await;
        if same_keys(&active_keys, &change.feed_keys) {
            debug!("[{}] Feed keys unchanged, keeping subscription", token);
        } else {
            info!(
                "[{}] Feed keys changed ({} -> {}), restarting live feed",
                token,
                active_keys.len(),
                change.feed_keys.len()
            );
            runtime.feed.start(change.feed_keys).await?;
        }

        Ok(())
    }

    /// Write the first record for every product without history
    pub async fn bootstrap_all(&self) -> Result<()> {
        for runtime in &self.products {
            match runtime.engine.bootstrap().await {
                Ok(record) => {
                    info!(
                        "[{}] Bootstrap record {} with {} constituents",
                        runtime.token(),
                        record.id,
                        record.allocated_tokens.len()
                    );
                }
                Err(RebalanceError::AlreadyBootstrapped(_)) => {
                    info!("[{}] Rebalance history exists, skipping bootstrap", runtime.token());
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Bootstrap failed for {}", runtime.token()));
                }
            }
        }
        Ok(())
    }

    /// Run one rebalance cycle per product as soon as live prices arrive
    pub async fn trigger_rebalance_now(self: &Arc<Self>) {
        let wait = self.config.service.rebalance_now_wait();
        let mut handles = Vec::with_capacity(self.products.len());

        for runtime in &self.products {
            let state = Arc::clone(self);
            let runtime = runtime.clone();
            let mut shutdown = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                let deadline = Instant::now() + wait;
                while runtime.product.live_price_count() == 0 && Instant::now() < deadline {
                    tokio::select! {
                        _ = sleep(Duration::from_secs(1)) => {}
                        _ = shutdown.changed() => return,
                    }
                }
                state.run_rebalance(&runtime).await;
            }));
        }

        self.jobs.lock().await.extend(handles);
    }

    /// One rebalance cycle; a new record is put live right away
    async fn run_rebalance(&self, runtime: &ProductRuntime) {
        if runtime.engine.run().await.is_ok() {
            if let Err(e) = self.refresh_product(runtime, None).await {
                warn!("[{}] Post-rebalance refresh failed: {:#}", runtime.token(), e);
            }
        }
    }

    fn spawn_refresh_job(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.config.service.basket_refresh_interval();

        tokio::spawn(async move {
            info!("Starting basket refresh task (every {:?})", period);
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => state.refresh_all().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Basket refresh task stopped");
        })
    }

    fn spawn_rebalance_job(self: &Arc<Self>, runtime: Arc<ProductRuntime>) -> Result<JoinHandle<()>> {
        let weekday = runtime.config.rebalance.weekday().map_err(anyhow::Error::msg)?;
        let time = runtime.config.rebalance.time_utc().map_err(anyhow::Error::msg)?;
        let state = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            loop {
                let next = next_weekly_run(Utc::now(), weekday, time);
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                info!("[{}] Next rebalance scheduled for: {}", runtime.token(), next);

                tokio::select! {
                    _ = sleep(wait) => state.run_rebalance(&runtime).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("[{}] Rebalance task stopped", runtime.token());
        }))
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down.load(Ordering::SeqCst)
    }

    /// Stop periodic jobs, close subscribers, close feeds, release state. Idempotent.
    pub async fn shutdown(&self) {
        if self.is_shut_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }

        info!("Stopping periodic jobs...");
        self.shutdown_tx.send_replace(true);
        let jobs: Vec<JoinHandle<()>> = self.jobs.lock().await.drain(..).collect();
        for job in jobs {
            if let Err(e) = job.await {
                error!("Background task ended abnormally: {}", e);
            }
        }

        info!("Closing subscriber connections...");
        self.gateway.close_subscribers().await;

        info!("Closing live price feeds...");
        for runtime in &self.products {
            runtime.feed.stop().await;
        }

        for runtime in &self.products {
            runtime.product.clear().await;
        }

        info!("Service components released");
    }
}

fn same_keys(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use index_core::{AllocatedToken, RebalanceRecord};
    use market_data::MarketListing;
    use persistence::InMemoryRebalanceStore;
    use price_feed::{FeedError, FeedState, OracleStream, PriceBatch};
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    struct FakeProvider(Vec<MarketListing>);

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        async fn fetch_listings(&self, _limit: usize) -> market_data::Result<Vec<MarketListing>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeDirectory {
        directory: std::sync::Mutex<Option<FeedDirectory>>,
    }

    #[async_trait]
    impl SymbolDirectorySource for FakeDirectory {
        async fn fetch_directory(&self) -> price_feed::Result<FeedDirectory> {
            self.directory
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| FeedError::Connection("directory unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl OracleConnector for FakeConnector {
        async fn connect(&self, _feed_keys: &[String]) -> price_feed::Result<Box<dyn OracleStream>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(IdleStream))
        }
    }

    /// Open transport that never delivers
    struct IdleStream;

    #[async_trait]
    impl OracleStream for IdleStream {
        async fn next_batch(&mut self) -> price_feed::Result<Option<PriceBatch>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> price_feed::Result<()> {
            Ok(())
        }
    }

    fn listing(id: u64, symbol: &str, price: f64, market_cap: f64) -> MarketListing {
        MarketListing {
            id,
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            price,
            market_cap,
            tags: vec![],
        }
    }

    fn directory() -> FeedDirectory {
        FeedDirectory::from_entries(vec![
            ("Crypto.BTC/USD", "0xbtc"),
            ("Crypto.ETH/USD", "0xeth"),
            ("Crypto.SOL/USD", "0xsol"),
        ])
    }

    struct Harness {
        state: Arc<ServiceState>,
        store: Arc<InMemoryRebalanceStore>,
        directory: Arc<FakeDirectory>,
        connector: Arc<FakeConnector>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRebalanceStore::new());
        let fake_directory = Arc::new(FakeDirectory::default());
        *fake_directory.directory.lock().unwrap() = Some(directory());
        let connector = Arc::new(FakeConnector::default());

        let provider = FakeProvider(vec![
            listing(1, "BTC", 50_000.0, 1e12),
            listing(2, "ETH", 3_000.0, 3.6e11),
            listing(5, "SOL", 150.0, 7e10),
        ]);

        let state = ServiceState::with_collaborators(
            ServiceConfig::default(),
            Collaborators {
                store: store.clone(),
                provider: Arc::new(provider),
                connector: connector.clone(),
                directory: fake_directory.clone(),
            },
        );

        Harness { state: Arc::new(state), store, directory: fake_directory, connector }
    }

    async fn wait_for_connects(connector: &FakeConnector, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while connector.connects.load(Ordering::SeqCst) < expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn sorted(mut keys: Vec<String>) -> Vec<String> {
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_refresh_installs_basket_and_starts_feed() {
        let h = harness();
        h.state.refresh_all().await;

        let runtime = h.state.product("TOP10").unwrap();
        let basket = runtime.product.basket().await.unwrap();
        assert_eq!(basket.ids(), vec![1, 2, 5]);
        assert_eq!(sorted(runtime.feed.active_keys().await), vec!["btc", "eth", "sol"]);
        wait_for_connects(&h.connector, 1).await;

        let snapshot = runtime.product.latest().await.unwrap();
        assert_eq!(snapshot.index_price, 0.0);

        // Same key set: the running subscription is kept
        h.state.refresh_all().await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);

        h.state.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_seeded_by_latest_record() {
        let h = harness();
        let held = AllocatedToken {
            id: 2,
            symbol: "ETH".to_string(),
            name: "ETH".to_string(),
            price: 3_000.0,
            market_cap: 3.6e11,
            quantity: 0.5,
        };
        h.store
            .append(&RebalanceRecord {
                id: Uuid::new_v4(),
                token: "TOP10".to_string(),
                timestamp: Utc::now(),
                index_value_at_rebalance: 1.0,
                collateral_value_per_index_token: 1_500.0,
                allocated_tokens: vec![held.clone()],
                added: vec![held],
                removed: vec![],
                retained: vec![],
            })
            .await
            .unwrap();

        h.state.refresh_all().await;

        let runtime = h.state.product("TOP10").unwrap();
        assert_eq!(runtime.product.basket().await.unwrap().ids(), vec![2]);
        assert_eq!(runtime.feed.active_keys().await, vec!["eth"]);

        h.state.shutdown().await;
    }

    #[tokio::test]
    async fn test_directory_failure_keeps_previous_mapping() {
        let h = harness();
        h.state.refresh_all().await;
        wait_for_connects(&h.connector, 1).await;

        *h.directory.directory.lock().unwrap() = None;
        h.state.refresh_all().await;

        let runtime = h.state.product("TOP10").unwrap();
        assert_eq!(sorted(runtime.product.feed_keys().await), vec!["btc", "eth", "sol"]);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);

        h.state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_releases_state() {
        let h = harness();
        h.state.refresh_all().await;
        wait_for_connects(&h.connector, 1).await;

        h.state.shutdown().await;
        h.state.shutdown().await;

        assert!(h.state.is_shut_down());
        let runtime = h.state.product("TOP10").unwrap();
        assert_eq!(runtime.feed.state(), FeedState::Stopped);
        assert!(runtime.product.latest().await.is_none());
        assert!(runtime.feed.active_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_all_writes_once() {
        let h = harness();

        h.state.bootstrap_all().await.unwrap();
        let record = h.store.latest("TOP10").await.unwrap().unwrap();
        assert_eq!(record.added.len(), 3);

        h.state.bootstrap_all().await.unwrap();
        assert_eq!(h.store.history("TOP10").await.unwrap().len(), 1);
    }
}
