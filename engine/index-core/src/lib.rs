//! Index Core - domain types and deterministic valuation for index tokens
//!
//! An index token tracks a basket of crypto assets weighted by market cap. This crate
//! holds the shared vocabulary (baskets, live ticks, snapshots, rebalance records) and
//! the pure valuation function every other crate builds on.

mod directory;
mod types;
mod valuator;

pub use directory::{normalize_feed_key, FeedDirectory};
pub use types::{
    AllocatedToken, BasketSnapshot, Composition, CompositionEntry, ConstituentId,
    ConstituentRef, IndexSnapshot, LivePriceTick, RebalanceRecord, SnapshotConstituent,
};
pub use valuator::{IndexValuator, PriceLookup};

/// Divisor applied to the summed live market cap before scaling to a token price
pub const DEFAULT_TOTAL_SUPPLY: f64 = 25e12;

/// Quote currency every constituent is priced against on the oracle
pub const QUOTE_CURRENCY: &str = "USD";
