//! Signal handling for graceful shutdown

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::service::ServiceState;

/// Setup signal handlers for graceful shutdown. Every Ctrl+C or SIGTERM is reported on
/// the returned channel.
pub fn setup_signal_handlers() -> Result<mpsc::Receiver<&'static str>> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(4);

    // Handle Ctrl+C (SIGINT)
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C signal: {}", e);
                return;
            }

            info!("Ctrl+C signal received");
            if ctrl_c_tx.send("SIGINT").await.is_err() {
                return;
            }
        }
    });

    // Handle SIGTERM (Unix only)
    #[cfg(unix)]
    {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::{AtomicBool, Ordering};

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, shutdown_flag.clone())?;

        tokio::spawn(async move {
            loop {
                if shutdown_flag.swap(false, Ordering::Relaxed) {
                    info!("SIGTERM signal received");
                    if shutdown_tx.send("SIGTERM").await.is_err() {
                        break;
                    }
                }
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            }
        });
    }

    Ok(shutdown_rx)
}

/// Graceful shutdown handler, bounded by the configured timeout
pub async fn graceful_shutdown(service_state: Arc<ServiceState>) -> Result<()> {
    let shutdown_timeout = service_state.config.service.shutdown_timeout();

    match timeout(shutdown_timeout, service_state.shutdown()).await {
        Ok(()) => {
            info!("Graceful shutdown complete");
        }
        Err(_) => {
            warn!("Shutdown did not finish within {:?}, forcing exit", shutdown_timeout);
        }
    }

    Ok(())
}
