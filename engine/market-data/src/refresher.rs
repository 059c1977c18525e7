use crate::config::{MarketDataConfig, RetryConfig};
use crate::error::{MarketDataError, Result};
use crate::provider::MarketDataProvider;
use crate::selection::{restrict_to_membership, select_top, BasketCriteria};
use index_core::{BasketSnapshot, ConstituentId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Builds basket snapshots from the market-data provider
pub struct BasketRefresher {
    provider: Arc<dyn MarketDataProvider>,
    listing_limit: usize,
    retry: RetryConfig,
}

impl BasketRefresher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: &MarketDataConfig) -> Self {
        Self { provider, listing_limit: config.listing_limit, retry: config.retry.clone() }
    }

    /// Fresh top-N candidate basket. May be empty; callers decide whether that is fatal.
    pub async fn fetch_candidates(&self, criteria: &BasketCriteria) -> Result<BasketSnapshot> {
        let listings = self.fetch_with_retry(criteria).await?;
        let constituents = select_top(&listings, criteria);

        info!("Selected {} candidates for {}", constituents.len(), criteria.token);

        Ok(BasketSnapshot::new(criteria.token.clone(), constituents))
    }

    /// Basket for live valuation: the given membership when present, otherwise top-N.
    ///
    /// Never returns an empty basket.
    pub async fn refresh(
        &self,
        criteria: &BasketCriteria,
        membership: Option<&[ConstituentId]>,
    ) -> Result<BasketSnapshot> {
        let listings = self.fetch_with_retry(criteria).await?;

        let seeded = membership.filter(|ids| !ids.is_empty());
        let constituents = match seeded {
            Some(ids) => restrict_to_membership(&listings, ids),
            None => select_top(&listings, criteria),
        };

        if constituents.is_empty() {
            return Err(MarketDataError::EmptyBasket(criteria.token.clone()));
        }

        info!(
            "Refreshed basket for {}: {} constituents ({})",
            criteria.token,
            constituents.len(),
            if seeded.is_some() { "seeded by last rebalance" } else { "top-N" }
        );

        Ok(BasketSnapshot::new(criteria.token.clone(), constituents))
    }

    async fn fetch_with_retry(
        &self,
        criteria: &BasketCriteria,
    ) -> Result<Vec<crate::models::MarketListing>> {
        let limit = self.listing_limit.max(criteria.top_n);
        run_with_retry(|| self.provider.fetch_listings(limit), &self.retry).await
    }
}

/// Run a fallible operation with exponential backoff
pub async fn run_with_retry<F, Fut, T, E>(mut f: F, retry_config: &RetryConfig) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = retry_config.max_retries.max(1);
    let mut delay = retry_config.initial_delay();
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!("Attempt {} failed: {}, retrying in {:?}", attempt, e, delay);
                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * retry_config.backoff_multiplier)
                        .min(retry_config.max_delay().as_secs_f64())
                        .max(0.0),
                );
                attempt += 1;
            }
        }
    }
}
