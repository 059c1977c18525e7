//! Configuration for the oracle connection

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Streaming endpoint
    pub stream_url: String,

    /// REST endpoint serving the symbol directory
    pub directory_url: String,

    /// Asset class requested from the symbol directory
    pub asset_type: String,

    /// Fixed delay before reconnecting after a transport failure
    pub reconnect_backoff_secs: u64,

    /// Upper bound on a single connect + subscribe attempt
    pub connect_timeout_secs: u64,

    /// Timeout for directory requests
    pub request_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            stream_url: "wss://hermes.pyth.network/ws".to_string(),
            directory_url: "https://hermes.pyth.network".to_string(),
            asset_type: "crypto".to_string(),
            reconnect_backoff_secs: 5,
            connect_timeout_secs: 10,
            request_timeout_secs: 15,
        }
    }
}

impl FeedConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.stream_url)
            .map_err(|e| format!("Invalid feed stream_url {}: {}", self.stream_url, e))?;
        url::Url::parse(&self.directory_url)
            .map_err(|e| format!("Invalid feed directory_url {}: {}", self.directory_url, e))?;

        if self.connect_timeout_secs == 0 {
            return Err("Feed connect_timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
