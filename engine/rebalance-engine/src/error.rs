use market_data::MarketDataError;
use persistence::StoreError;
use thiserror::Error;

/// Reasons a rebalance cycle aborts. Nothing is persisted for an aborted cycle.
#[derive(Error, Debug)]
pub enum RebalanceError {
    #[error("No prior rebalance record for {0}")]
    MissingPriorRecord(String),

    #[error("No live index snapshot for {0}")]
    MissingLiveSnapshot(String),

    #[error("No held constituent of {0} has a live price")]
    NoLivePrices(String),

    #[error("Candidate basket for {0} is empty")]
    EmptyCandidateBasket(String),

    #[error("{0} already has rebalance history")]
    AlreadyBootstrapped(String),

    #[error("Collateral pricing failed: {0}")]
    Collateral(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),
}

pub type Result<T> = std::result::Result<T, RebalanceError>;
