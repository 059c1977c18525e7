//! Oracle symbol directory source

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use index_core::FeedDirectory;
use serde::Deserialize;
use tracing::{debug, info};

/// Fetches the `SYMBOL/USD` to feed key table from the oracle
#[async_trait::async_trait]
pub trait SymbolDirectorySource: Send + Sync {
    async fn fetch_directory(&self) -> Result<FeedDirectory>;
}

/// Entry of the Hermes `/v2/price_feeds` listing
#[derive(Debug, Clone, Deserialize)]
pub struct HermesFeedMetadata {
    pub id: String,
    #[serde(default)]
    pub attributes: HermesFeedAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HermesFeedAttributes {
    pub symbol: Option<String>,
}

/// Build a directory from listing entries; entries without a symbol are skipped
pub fn directory_from_feeds(feeds: &[HermesFeedMetadata]) -> FeedDirectory {
    let mut directory = FeedDirectory::new();
    for feed in feeds {
        match feed.attributes.symbol.as_deref() {
            Some(symbol) => directory.insert(symbol, &feed.id),
            None => debug!("Skipping oracle feed {} without a symbol", feed.id),
        }
    }
    directory
}

pub struct HermesDirectoryClient {
    client: reqwest::Client,
    base_url: String,
    asset_type: String,
}

impl HermesDirectoryClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.directory_url.trim_end_matches('/').to_string(),
            asset_type: config.asset_type.clone(),
        })
    }
}

#[async_trait::async_trait]
impl SymbolDirectorySource for HermesDirectoryClient {
    async fn fetch_directory(&self) -> Result<FeedDirectory> {
        let url = format!("{}/v2/price_feeds", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("asset_type", self.asset_type.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Connection(format!(
                "Symbol directory request failed with status {}",
                response.status()
            )));
        }

        let feeds: Vec<HermesFeedMetadata> = response.json().await?;
        let directory = directory_from_feeds(&feeds);

        info!("Fetched oracle symbol directory: {} feeds, {} pairs", feeds.len(), directory.len());

        Ok(directory)
    }
}
