//! Error types for the index valuation service

use thiserror::Error;

/// Result type for valuation operations
pub type Result<T> = std::result::Result<T, ValuationError>;

#[derive(Error, Debug)]
pub enum ValuationError {
    #[error("Basket for {got} offered to product {expected}")]
    TokenMismatch { expected: String, got: String },

    #[error("Refusing to install an empty basket for {0}")]
    EmptyBasket(String),
}
