use thiserror::Error;

/// Errors returned by the market-data provider
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Provider request failed with status {0}")]
    Status(u16),

    #[error("API key not configured (set {0})")]
    MissingApiKey(String),

    #[error("Provider returned no usable listings for {0}")]
    EmptyBasket(String),
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
