//! # Price Feed
//!
//! Streaming oracle prices for the constituents of an index basket.
//!
//! - [`LivePriceFeed`] supervises one subscription per index product and reconnects after
//!   transport failures with a fixed backoff.
//! - [`HermesConnector`] and [`HermesDirectoryClient`] speak the Pyth Hermes wire format.
//! - [`PriceTickHandler`] is implemented by whoever consumes the ticks.

pub mod config;
pub mod connector;
pub mod directory;
pub mod error;
pub mod hermes;
pub mod metrics;
pub mod supervisor;

pub use config::FeedConfig;
pub use connector::{OracleConnector, OracleStream, PriceBatch, PriceTickHandler};
pub use directory::{HermesDirectoryClient, SymbolDirectorySource};
pub use error::{FeedError, Result};
pub use hermes::HermesConnector;
pub use metrics::FeedMetricsSnapshot;
pub use supervisor::{FeedState, LivePriceFeed};
