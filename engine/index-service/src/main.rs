//! Index Token Service
//!
//! Keeps a live index price per configured product, streams it to subscribers, serves it
//! over REST and rebalances each basket on its weekly schedule.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use index_service::{
    graceful_shutdown, initialize_logging, load_configuration, setup_signal_handlers, ServiceState,
};

#[derive(Parser, Debug)]
#[command(name = "index-service")]
#[command(about = "Live crypto index valuation, streaming and weekly rebalancing")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Write the first rebalance record for products without history, then keep running
    #[arg(long)]
    bootstrap: bool,

    /// Run one rebalance per product once live prices arrive
    #[arg(long)]
    rebalance_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
        config.validate()?;
    }

    // Held until exit so buffered file output is flushed
    let _log_guard = initialize_logging(&config.logging)?;

    info!("Starting Index Service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {} products, ws port {}, http port {}",
        config.products.len(),
        config.gateway.ws_port,
        config.gateway.http_port
    );

    let service_state = Arc::new(ServiceState::new(config).await?);
    info!("Service state initialized");

    let mut shutdown_signal = setup_signal_handlers()?;
    info!("Signal handlers configured");

    if cli.bootstrap {
        service_state.bootstrap_all().await.context("Bootstrap failed")?;
    }

    service_state.start().await?;

    if cli.rebalance_now {
        info!("Immediate rebalance requested");
        service_state.trigger_rebalance_now().await;
    }

    info!("Index Service is running. Press Ctrl+C to shutdown gracefully.");
    match shutdown_signal.recv().await {
        Some(signal) => info!("{} received. Initiating graceful shutdown...", signal),
        None => warn!("Signal handlers exited. Initiating graceful shutdown..."),
    }

    graceful_shutdown(service_state).await?;

    info!("Index Service shutdown complete");
    Ok(())
}
