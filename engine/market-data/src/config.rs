use crate::error::{MarketDataError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the market-data provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Provider base URL
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// API key; takes precedence over the environment variable
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Quote currency requested from the provider
    pub convert: String,

    /// Number of listings requested per call (must cover top-N plus exclusions)
    pub listing_limit: usize,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retry configuration
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_retries: u32,

    /// Initial retry delay in seconds
    pub initial_delay_secs: u64,

    /// Maximum retry delay in seconds
    pub max_delay_secs: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pro-api.coinmarketcap.com".to_string(),
            api_key_env: "CMC_API_KEY".to_string(),
            api_key: None,
            convert: "USD".to_string(),
            listing_limit: 100,
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, initial_delay_secs: 5, max_delay_secs: 300, backoff_multiplier: 2.0 }
    }
}

impl MarketDataConfig {
    /// Resolve the API key from configuration or environment
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MarketDataError::MissingApiKey(self.api_key_env.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listing_limit == 0 {
            return Err("Market data listing_limit must be greater than 0".to_string());
        }
        if self.retry.max_retries == 0 {
            return Err("Market data retry.max_retries must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}
