//! Rebalance Engine
//!
//! Weekly job per index product: measures how the previous allocation has grown at live
//! prices, selects a fresh top-N basket, allocates quantities by market-cap share so the
//! total value equals the collateral per index token, and appends the resulting record.

pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod sources;

pub use calculator::{allocate, collateral_growth, diff, CollateralGrowth, RebalanceDiff};
pub use config::RebalanceConfig;
pub use engine::RebalanceEngine;
pub use error::{RebalanceError, Result};
pub use schedule::next_weekly_run;
pub use sources::{CandidateSource, CollateralPricing, FixedCollateral, SnapshotSource};
