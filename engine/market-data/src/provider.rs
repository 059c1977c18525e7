use crate::config::MarketDataConfig;
use crate::error::{MarketDataError, Result};
use crate::models::{parse_cmc_listings, MarketListing};
use reqwest::Client;
use tracing::info;

/// Source of ranked asset listings
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Up to `limit` listings, ranked by market cap
    async fn fetch_listings(&self, limit: usize) -> Result<Vec<MarketListing>>;
}

/// CoinMarketCap `listings/latest` client
pub struct CoinMarketCapClient {
    client: Client,
    base_url: String,
    api_key: String,
    convert: String,
}

impl CoinMarketCapClient {
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key()?,
            convert: config.convert.clone(),
        })
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for CoinMarketCapClient {
    async fn fetch_listings(&self, limit: usize) -> Result<Vec<MarketListing>> {
        let url = format!("{}/v1/cryptocurrency/listings/latest", self.base_url);
        let limit = limit.to_string();

        info!("Fetching top {} listings from: {}", limit, url);

        let response = self
            .client
            .get(&url)
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .header("Accept", "application/json")
            .query(&[
                ("start", "1"),
                ("limit", limit.as_str()),
                ("convert", self.convert.as_str()),
                ("sort", "market_cap"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Error responses still carry a status envelope with the provider's reason
        match parse_cmc_listings(&body, &self.convert) {
            Ok(listings) if status.is_success() => {
                info!("Successfully fetched {} listings", listings.len());
                Ok(listings)
            }
            Ok(_) => Err(MarketDataError::Status(status.as_u16())),
            Err(MarketDataError::Serialization(_)) if !status.is_success() => {
                Err(MarketDataError::Status(status.as_u16()))
            }
            Err(e) => Err(e),
        }
    }
}
