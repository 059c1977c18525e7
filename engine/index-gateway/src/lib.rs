//! IndexGateway - WebSocket snapshot stream and REST API
//!
//! Subscribers connect to `ws://host:port/{token}`, receive the latest snapshot
//! immediately and then one per broadcast interval. The REST API serves the same
//! snapshot, its composition view and a health report.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod rest_api;
pub mod websocket_handler;

pub use broadcaster::{ClientId, SnapshotBroadcaster, SUBSCRIBER_BUFFER};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::IndexGateway;
pub use registry::{ProductEndpoint, ProductHealth, ProductRegistry};
