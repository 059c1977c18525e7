//! Pure allocation arithmetic for rebalance cycles

use index_core::{AllocatedToken, BasketSnapshot, ConstituentId, IndexSnapshot, RebalanceRecord};
use std::collections::HashSet;

/// Value carried over from the prior allocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollateralGrowth {
    /// Average of the positive `price * prior quantity` values
    pub average_value: f64,
    /// Held constituents that had a live price
    pub matched: usize,
    /// Held constituents without a live price (excluded from the average)
    pub unmatched: usize,
}

/// Measure what the previously allocated quantities are worth at live prices
pub fn collateral_growth(prior: &RebalanceRecord, snapshot: &IndexSnapshot) -> CollateralGrowth {
    let mut positive_values = Vec::new();
    let mut matched = 0;
    let mut unmatched = 0;

    for held in &prior.allocated_tokens {
        match snapshot.live_price_of(held.id) {
            Some(price) => {
                matched += 1;
                let value = price * held.quantity;
                if value > 0.0 {
                    positive_values.push(value);
                }
            }
            None => unmatched += 1,
        }
    }

    let average_value = if positive_values.is_empty() {
        0.0
    } else {
        positive_values.iter().sum::<f64>() / positive_values.len() as f64
    };

    CollateralGrowth { average_value, matched, unmatched }
}

/// `quantity_i = collateral * (marketCap_i / Σ marketCap) / price_i`, priced at the
/// candidates' reference quotes
pub fn allocate(candidates: &BasketSnapshot, collateral: f64) -> Vec<AllocatedToken> {
    let total_market_cap: f64 =
        candidates.constituents.iter().map(|c| c.reference_market_cap).sum();

    candidates
        .constituents
        .iter()
        .map(|c| {
            let quantity = if total_market_cap == 0.0 || c.reference_price == 0.0 {
                0.0
            } else {
                collateral * (c.reference_market_cap / total_market_cap) / c.reference_price
            };
            AllocatedToken {
                id: c.id,
                symbol: c.symbol.clone(),
                name: c.name.clone(),
                price: c.reference_price,
                market_cap: c.reference_market_cap,
                quantity,
            }
        })
        .collect()
}

/// Membership change between two allocations, by constituent id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceDiff {
    pub added: Vec<AllocatedToken>,
    /// Entries from the prior allocation
    pub removed: Vec<AllocatedToken>,
    /// Entries from the fresh allocation
    pub retained: Vec<AllocatedToken>,
}

pub fn diff(prior: &[AllocatedToken], fresh: &[AllocatedToken]) -> RebalanceDiff {
    let prior_ids: HashSet<ConstituentId> = prior.iter().map(|t| t.id).collect();
    let fresh_ids: HashSet<ConstituentId> = fresh.iter().map(|t| t.id).collect();

    let mut diff = RebalanceDiff::default();
    for token in fresh {
        if prior_ids.contains(&token.id) {
            diff.retained.push(token.clone());
        } else {
            diff.added.push(token.clone());
        }
    }
    diff.removed = prior.iter().filter(|t| !fresh_ids.contains(&t.id)).cloned().collect();
    diff
}
