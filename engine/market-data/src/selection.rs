//! Basket membership selection from ranked listings

use crate::models::MarketListing;
use index_core::{ConstituentId, ConstituentRef};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Which listings may enter a product's basket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketCriteria {
    pub token: String,
    pub top_n: usize,
    /// Symbols never admitted, compared case-insensitively
    pub excluded_symbols: Vec<String>,
    /// Provider tags that disqualify a listing
    pub excluded_tags: Vec<String>,
}

impl BasketCriteria {
    pub fn new(token: impl Into<String>, top_n: usize) -> Self {
        Self {
            token: token.into(),
            top_n,
            excluded_symbols: Vec::new(),
            excluded_tags: vec!["stablecoin".to_string()],
        }
    }

    pub fn with_excluded_symbols(mut self, symbols: Vec<String>) -> Self {
        self.excluded_symbols = symbols;
        self
    }

    pub fn admits(&self, listing: &MarketListing) -> bool {
        if listing.price <= 0.0 || listing.market_cap <= 0.0 {
            return false;
        }
        if self.excluded_symbols.iter().any(|s| s.eq_ignore_ascii_case(&listing.symbol)) {
            return false;
        }
        !self.excluded_tags.iter().any(|tag| listing.has_tag(tag))
    }
}

/// Top-N admitted listings by market cap, largest first
pub fn select_top(listings: &[MarketListing], criteria: &BasketCriteria) -> Vec<ConstituentRef> {
    let mut admitted: Vec<&MarketListing> = listings.iter().filter(|l| criteria.admits(l)).collect();
    admitted.sort_by(|a, b| b.market_cap.total_cmp(&a.market_cap));

    let mut seen = HashSet::new();
    admitted
        .into_iter()
        .filter(|l| seen.insert(l.id))
        .take(criteria.top_n)
        .map(MarketListing::to_constituent)
        .collect()
}

/// Fresh quotes for a fixed membership, in membership order.
///
/// Members missing from the listing are left out and logged; exclusion rules are not
/// re-applied to an existing membership.
pub fn restrict_to_membership(
    listings: &[MarketListing],
    membership: &[ConstituentId],
) -> Vec<ConstituentRef> {
    let by_id: HashMap<ConstituentId, &MarketListing> =
        listings.iter().map(|l| (l.id, l)).collect();

    membership
        .iter()
        .filter_map(|id| match by_id.get(id) {
            Some(listing) => Some(listing.to_constituent()),
            None => {
                warn!("Basket member {} missing from provider listings", id);
                None
            }
        })
        .collect()
}
