//! Index Service Library
//!
//! Wires the valuation pipeline, the live price feeds, the rebalance engine and the
//! gateway into one process: configuration loading, logging, the per-product runtime and
//! graceful shutdown.

use anyhow::{Context, Result};
use std::path::Path;

pub mod config;
pub mod logging;
pub mod service;
pub mod signals;

pub use config::{ProductConfig, ServiceConfig};
pub use logging::initialize_logging;
pub use service::{Collaborators, ProductRuntime, ServiceState};
pub use signals::{graceful_shutdown, setup_signal_handlers};

/// Load configuration from an optional file and environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}
