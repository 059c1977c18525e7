//! Service configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use index_core::DEFAULT_TOTAL_SUPPLY;
use index_gateway::GatewayConfig;
use market_data::{BasketCriteria, MarketDataConfig};
use persistence::StoreConfig;
use price_feed::FeedConfig;
use rebalance_engine::RebalanceConfig;

/// Prefix of environment variables overriding configuration, e.g. `INDEX__GATEWAY__WS_PORT`
pub const ENV_PREFIX: &str = "INDEX";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// WebSocket stream and REST API
    pub gateway: GatewayConfig,

    /// Price oracle connection
    pub feed: FeedConfig,

    /// Market-data provider
    pub market_data: MarketDataConfig,

    /// Rebalance record store
    pub store: StoreConfig,

    /// Index products served by this process
    pub products: Vec<ProductConfig>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Seconds between basket and symbol directory refreshes
    pub basket_refresh_secs: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// How long `--rebalance-now` waits for live prices before running anyway
    pub rebalance_now_wait_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Directory for daily-rolling log files (if None, logs to stdout only)
    pub directory: Option<PathBuf>,

    /// Log file name prefix
    pub file_prefix: String,
}

/// One index product
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    /// Index token name, also the URL path segment
    pub token: String,

    /// Basket size
    pub top_n: usize,

    /// Symbols never admitted to the basket
    pub excluded_symbols: Vec<String>,

    /// Provider tags that disqualify a listing
    pub excluded_tags: Vec<String>,

    /// Divisor turning total market cap into the index price
    pub total_supply: f64,

    /// Weekly rebalance schedule and collateral base
    pub rebalance: RebalanceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            logging: LoggingConfig::default(),
            gateway: GatewayConfig::default(),
            feed: FeedConfig::default(),
            market_data: MarketDataConfig::default(),
            store: StoreConfig::default(),
            products: vec![ProductConfig::default()],
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { basket_refresh_secs: 1200, shutdown_timeout_secs: 10, rebalance_now_wait_secs: 60 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
            file_prefix: "index-service.log".to_string(),
        }
    }
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            token: "TOP10".to_string(),
            top_n: 10,
            excluded_symbols: Vec::new(),
            excluded_tags: vec!["stablecoin".to_string()],
            total_supply: DEFAULT_TOTAL_SUPPLY,
            rebalance: RebalanceConfig::default(),
        }
    }
}

impl ServiceSettings {
    pub fn basket_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.basket_refresh_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn rebalance_now_wait(&self) -> Duration {
        Duration::from_secs(self.rebalance_now_wait_secs)
    }
}

impl ProductConfig {
    pub fn criteria(&self) -> BasketCriteria {
        let mut criteria = BasketCriteria::new(self.token.clone(), self.top_n)
            .with_excluded_symbols(self.excluded_symbols.clone());
        criteria.excluded_tags = self.excluded_tags.clone();
        criteria
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.as_str() {
            "json" | "pretty" | "compact" => {}
            _ => return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format)),
        }

        if self.service.basket_refresh_secs == 0 {
            return Err(anyhow::anyhow!("Basket refresh interval must be greater than 0"));
        }

        self.gateway.validate().map_err(|e| anyhow::anyhow!("Gateway: {}", e))?;
        self.feed.validate().map_err(|e| anyhow::anyhow!("Feed: {}", e))?;
        self.market_data.validate().map_err(|e| anyhow::anyhow!("Market data: {}", e))?;
        self.store.validate().map_err(|e| anyhow::anyhow!("Store: {}", e))?;

        if self.products.is_empty() {
            return Err(anyhow::anyhow!("At least one product must be configured"));
        }

        let mut tokens = HashSet::new();
        for product in &self.products {
            persistence::validate_token(&product.token)
                .with_context(|| format!("Invalid product token: {:?}", product.token))?;
            if !tokens.insert(product.token.as_str()) {
                return Err(anyhow::anyhow!("Duplicate product token: {}", product.token));
            }
            if product.top_n == 0 {
                return Err(anyhow::anyhow!("{}: top_n must be greater than 0", product.token));
            }
            if !product.total_supply.is_finite() || product.total_supply <= 0.0 {
                return Err(anyhow::anyhow!("{}: total_supply must be positive", product.token));
            }
            product
                .rebalance
                .validate()
                .map_err(|e| anyhow::anyhow!("{}: {}", product.token, e))?;
        }

        Ok(())
    }
}

/// Load configuration: defaults, then the optional TOML file, then `INDEX__*` environment
/// variables (including those from a `.env` file)
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    dotenv::dotenv().ok();

    let mut builder = config::Config::builder().add_source(
        config::Config::try_from(&ServiceConfig::default())
            .context("Failed to seed configuration defaults")?,
    );

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true),
    );

    let config: ServiceConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    config.validate()?;
    Ok(config)
}
