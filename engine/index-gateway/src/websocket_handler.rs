//! WebSocket connection handler for the snapshot stream

use crate::broadcaster::SUBSCRIBER_BUFFER;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::ProductRegistry;

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// Index token addressed by a `ws://host:port/{token}` request path
pub fn token_from_path(path: &str) -> Option<&str> {
    let token = path.trim_matches('/');
    if token.is_empty() || token.contains('/') {
        None
    } else {
        Some(token)
    }
}

/// WebSocket connection handler
pub struct WebSocketHandler {
    peer_addr: SocketAddr,
    registry: Arc<ProductRegistry>,
}

impl WebSocketHandler {
    pub fn new(peer_addr: SocketAddr, registry: Arc<ProductRegistry>) -> Self {
        Self { peer_addr, registry }
    }

    /// Handle the WebSocket connection until either side closes it
    pub async fn handle(&self, stream: TcpStream) -> GatewayResult<()> {
        let mut requested: Option<String> = None;
        let registry = self.registry.clone();

        // Unknown tokens are refused during the handshake
        let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
            match token_from_path(request.uri().path()).filter(|t| registry.contains(t)) {
                Some(token) => {
                    requested = Some(token.to_string());
                    Ok(response)
                }
                None => {
                    let mut rejection = ErrorResponse::new(Some("Unknown index token".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            }
        })
        .await?;

        let token = requested.ok_or_else(|| GatewayError::Connection("Missing index token".to_string()))?;
        let endpoint = self
            .registry
            .get(&token)
            .ok_or_else(|| GatewayError::UnknownToken(token.clone()))?
            .clone();

        info!("Subscriber {} connected to {}", self.peer_addr, token);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<WsMessage>(SUBSCRIBER_BUFFER);

        let mut sender_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = message.is_close();
                if let Err(e) = ws_sender.send(message).await {
                    debug!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let client_id = endpoint.broadcaster.add_client(tx.clone()).await?;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(WsMessage::Ping(data))) => {
                        if tx.try_send(WsMessage::Pong(data)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Text(text))) => {
                        debug!("Ignoring client message on {}: {}", token, text);
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("Received binary message from {}, ignoring", self.peer_addr);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", self.peer_addr, e);
                        break;
                    }
                },
                // Writer finished: the broadcaster closed us or the peer went away
                _ = &mut sender_task => break,
            }
        }

        endpoint.broadcaster.remove_client(&client_id).await;
        sender_task.abort();

        info!("Subscriber {} disconnected from {}", self.peer_addr, token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProductEndpoint;
    use chrono::Utc;
    use futures_util::Stream;
    use index_core::{BasketSnapshot, ConstituentRef, FeedDirectory, LivePriceTick};
    use index_valuation::IndexProduct;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Error as WsError;

    fn btc_tick(price: f64) -> LivePriceTick {
        LivePriceTick { feed_key: "btc".to_string(), price, observed_at: Utc::now() }
    }

    async fn priced_product() -> Arc<IndexProduct> {
        let product = Arc::new(IndexProduct::new("TOP10", 25e12));
        product
            .replace_directory(FeedDirectory::from_entries(vec![("Crypto.BTC/USD", "0xbtc")]))
            .await;
        product
            .replace_basket(BasketSnapshot::new(
                "TOP10",
                vec![ConstituentRef {
                    id: 1,
                    symbol: "BTC".to_string(),
                    name: "Bitcoin".to_string(),
                    reference_price: 50_000.0,
                    reference_market_cap: 1e12,
                }],
            ))
            .await
            .unwrap();
        product.apply_ticks(&[btc_tick(60_000.0)]).await;
        product
    }

    /// Accept a single connection and run the handler on it
    async fn serve_one(
        registry: Arc<ProductRegistry>,
    ) -> (SocketAddr, JoinHandle<GatewayResult<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            WebSocketHandler::new(peer_addr, registry).handle(stream).await
        });
        (addr, handle)
    }

    async fn next_message<S>(ws: &mut S) -> WsMessage
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap()
    }

    fn token_price(message: WsMessage) -> f64 {
        match message {
            WsMessage::Text(text) => {
                let body: serde_json::Value = serde_json::from_str(&text).unwrap();
                body["tokenPrice"].as_f64().unwrap()
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscriber_stream_lifecycle() {
        let product = priced_product().await;
        let mut registry = ProductRegistry::new();
        registry.register(ProductEndpoint::new(product.clone(), None));
        let registry = Arc::new(registry);
        let broadcaster = registry.get("TOP10").unwrap().broadcaster.clone();

        let (addr, handle) = serve_one(registry).await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/TOP10")).await.unwrap();

        // Latest snapshot right after the handshake
        assert!((token_price(next_message(&mut ws).await) - 4.8).abs() < 1e-9);
        assert_eq!(broadcaster.client_count().await, 1);

        ws.send(WsMessage::Ping(vec![1, 2, 3])).await.unwrap();
        assert_eq!(next_message(&mut ws).await, WsMessage::Pong(vec![1, 2, 3]));

        product.apply_ticks(&[btc_tick(75_000.0)]).await;
        assert_eq!(broadcaster.broadcast().await.unwrap(), 1);
        assert!((token_price(next_message(&mut ws).await) - 6.0).abs() < 1e-9);

        ws.close(None).await.unwrap();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap().unwrap();
        assert_eq!(broadcaster.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected_at_handshake() {
        let mut registry = ProductRegistry::new();
        registry.register(ProductEndpoint::new(priced_product().await, None));
        let registry = Arc::new(registry);

        let (addr, handle) = serve_one(registry.clone()).await;
        let result = connect_async(format!("ws://{addr}/NOPE")).await;

        match result {
            Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
            other => panic!("expected 404 handshake rejection, got {:?}", other.map(|_| ())),
        }
        assert!(timeout(Duration::from_secs(2), handle).await.unwrap().unwrap().is_err());
        assert_eq!(registry.get("TOP10").unwrap().broadcaster.client_count().await, 0);
    }

    #[test]
    fn test_token_from_path() {
        assert_eq!(token_from_path("/TOP10"), Some("TOP10"));
        assert_eq!(token_from_path("/TOP10/"), Some("TOP10"));
        assert_eq!(token_from_path("/"), None);
        assert_eq!(token_from_path("/api/TOP10"), None);
    }
}
