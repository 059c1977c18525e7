//! Error types for the IndexGateway

use thiserror::Error;

/// Errors that can occur in the IndexGateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown index token: {0}")]
    UnknownToken(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for IndexGateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
