//! Index Valuation Service - live valuation state per index product
//!
//! Each [`IndexProduct`] owns its basket, symbol directory, live price map and snapshot
//! cache. It consumes oracle ticks as a [`price_feed::PriceTickHandler`] and recomputes
//! the index on every batch.

mod cache;
mod error;
mod product;

pub use cache::SnapshotCache;
pub use error::{Result, ValuationError};
pub use product::{BasketChange, IndexProduct, LivePriceMap};
