//! Main IndexGateway implementation

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::ProductRegistry;
use crate::rest_api;
use crate::websocket_handler::WebSocketHandler;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Serves the WebSocket snapshot stream and the REST API for all registered products
pub struct IndexGateway {
    config: GatewayConfig,
    registry: Arc<ProductRegistry>,
    connection_count: Arc<AtomicUsize>,
}

impl IndexGateway {
    pub fn new(config: GatewayConfig, registry: Arc<ProductRegistry>) -> Self {
        Self { config, registry, connection_count: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn registry(&self) -> Arc<ProductRegistry> {
        self.registry.clone()
    }

    /// Start broadcasters, the WebSocket listener and the REST server. All of them wind
    /// down once `shutdown` flips to true.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> GatewayResult<Vec<JoinHandle<()>>> {
        let ws_addr = self
            .config
            .ws_addr()
            .map_err(|e| GatewayError::Config(format!("Invalid WebSocket address: {e}")))?;
        let http_addr = self
            .config
            .http_addr()
            .map_err(|e| GatewayError::Config(format!("Invalid HTTP address: {e}")))?;

        let mut tasks = Vec::new();

        for endpoint in self.registry.endpoints() {
            tasks.push(
                endpoint
                    .broadcaster
                    .spawn_broadcast_task(self.config.broadcast_interval(), shutdown.clone()),
            );
        }

        let listener = TcpListener::bind(ws_addr).await?;
        info!("IndexGateway WebSocket stream listening on {}", ws_addr);
        tasks.push(self.spawn_accept_loop(listener, shutdown.clone()));

        let routes = rest_api::create_routes(self.registry.clone());
        let mut http_shutdown = shutdown;
        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(http_addr, async move {
                while !*http_shutdown.borrow() {
                    if http_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| GatewayError::Config(format!("Failed to bind REST API on {http_addr}: {e}")))?;
        info!("IndexGateway REST API listening on {}", bound);
        tasks.push(tokio::spawn(server));

        Ok(tasks)
    }

    fn spawn_accept_loop(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let connection_count = self.connection_count.clone();
        let max_connections = self.config.max_connections;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = Self::handle_connection(
                                stream,
                                peer_addr,
                                registry.clone(),
                                connection_count.clone(),
                                max_connections,
                            ) {
                                warn!("Rejected connection from {}: {}", peer_addr, e);
                            }
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("IndexGateway WebSocket listener stopped");
        })
    }

    fn handle_connection(
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<ProductRegistry>,
        connection_count: Arc<AtomicUsize>,
        max_connections: usize,
    ) -> GatewayResult<()> {
        if connection_count.fetch_add(1, Ordering::SeqCst) >= max_connections {
            connection_count.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::Connection("Connection limit exceeded".to_string()));
        }

        let handler = WebSocketHandler::new(peer_addr, registry);
        tokio::spawn(async move {
            if let Err(e) = handler.handle(stream).await {
                warn!("WebSocket handler error for {}: {}", peer_addr, e);
            }
            connection_count.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Close every subscriber transport. Idempotent.
    pub async fn close_subscribers(&self) {
        for endpoint in self.registry.endpoints() {
            endpoint.broadcaster.close_all().await;
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }
}
