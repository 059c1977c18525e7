//! Configuration for the IndexGateway

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the IndexGateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind both servers to
    pub host: String,

    /// Port of the WebSocket snapshot stream
    pub ws_port: u16,

    /// Port of the REST API
    pub http_port: u16,

    /// Maximum number of concurrent WebSocket connections
    pub max_connections: usize,

    /// Seconds between snapshot broadcasts
    pub broadcast_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ws_port: 8080,
            http_port: 8081,
            max_connections: 10000,
            broadcast_interval_secs: 1,
        }
    }
}

impl GatewayConfig {
    pub fn ws_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.ws_port).parse()
    }

    pub fn http_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.http_port).parse()
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.ws_addr().map_err(|e| format!("Invalid WebSocket address: {}", e))?;
        self.http_addr().map_err(|e| format!("Invalid HTTP address: {}", e))?;

        if self.ws_port == self.http_port {
            return Err("WebSocket and HTTP ports must differ".to_string());
        }
        if self.max_connections == 0 {
            return Err("Max connections must be greater than 0".to_string());
        }
        if self.broadcast_interval_secs == 0 {
            return Err("Broadcast interval must be greater than 0".to_string());
        }

        Ok(())
    }
}
