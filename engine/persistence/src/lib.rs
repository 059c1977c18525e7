//! # Persistence Layer
//!
//! Append-only storage for rebalance records. Every index token keeps its own ordered
//! history; the latest record seeds basket membership and carries the quantities the next
//! rebalance measures collateral growth against.
//!
//! ## Architecture
//!
//! - **RebalanceStore**: Abstract trait for record stores
//! - **LocalRebalanceStore**: JSON files per token, appended with write-then-rename
//! - **InMemoryRebalanceStore**: Process-local store for tests and dry runs
//!
//! ## Usage
//!
//! ```rust
//! use persistence::{create_store, StoreConfig};
//! use tempfile::TempDir;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let temp_dir = TempDir::new()?;
//!     let store = create_store(StoreConfig::new(temp_dir.path()))?;
//!     assert!(store.latest("TOP10").await?.is_none());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod local;

pub use backend::{create_store, validate_token, InMemoryRebalanceStore, RebalanceStore};
pub use config::{StoreBackend, StoreConfig};
pub use error::{Result, StoreError};
pub use local::LocalRebalanceStore;
