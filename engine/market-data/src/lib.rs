//! Market Data Service
//!
//! Fetches ranked crypto listings from the market-data provider and turns them into basket
//! snapshots: a top-N candidate list for rebalancing, or fresh quotes for the membership of
//! the last rebalance.

pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod refresher;
pub mod selection;

pub use config::{MarketDataConfig, RetryConfig};
pub use error::{MarketDataError, Result};
pub use models::MarketListing;
pub use provider::{CoinMarketCapClient, MarketDataProvider};
pub use refresher::{run_with_retry, BasketRefresher};
pub use selection::BasketCriteria;
