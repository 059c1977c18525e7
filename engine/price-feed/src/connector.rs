//! Seams between the feed supervisor, the oracle transport and the tick consumer

use crate::error::Result;
use index_core::LivePriceTick;

/// Ticks decoded from one oracle message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceBatch {
    pub ticks: Vec<LivePriceTick>,
    /// Items dropped because they could not be decoded
    pub malformed: usize,
}

impl PriceBatch {
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.malformed == 0
    }
}

/// Opens one subscribed transport to the oracle
#[async_trait::async_trait]
pub trait OracleConnector: Send + Sync {
    async fn connect(&self, feed_keys: &[String]) -> Result<Box<dyn OracleStream>>;
}

/// An open, subscribed oracle transport
#[async_trait::async_trait]
pub trait OracleStream: Send {
    /// Next decoded batch. `Ok(None)` means the server closed the stream.
    async fn next_batch(&mut self) -> Result<Option<PriceBatch>>;

    /// Close the transport. Errors are logged by the caller and otherwise ignored.
    async fn close(&mut self) -> Result<()>;
}

/// Receives every batch of live ticks in arrival order
#[async_trait::async_trait]
pub trait PriceTickHandler: Send + Sync {
    async fn on_ticks(&self, ticks: &[LivePriceTick]);
}
