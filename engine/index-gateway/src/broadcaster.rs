//! Snapshot broadcasting for one index product

use crate::error::GatewayResult;
use index_valuation::SnapshotCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type ClientId = Uuid;

/// Outbound frames queued per subscriber. A subscriber whose queue is full is dropped.
pub const SUBSCRIBER_BUFFER: usize = 32;

/// Pushes the latest snapshot of one product to its WebSocket subscribers
pub struct SnapshotBroadcaster {
    token: String,
    cache: SnapshotCache,

    /// Connected clients (client id -> WebSocket sender)
    clients: Arc<RwLock<HashMap<ClientId, mpsc::Sender<Message>>>>,
}

impl SnapshotBroadcaster {
    pub fn new(token: impl Into<String>, cache: SnapshotCache) -> Self {
        Self { token: token.into(), cache, clients: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Register a subscriber and send it the latest snapshot, if any
    pub async fn add_client(&self, sender: mpsc::Sender<Message>) -> GatewayResult<ClientId> {
        let client_id = Uuid::new_v4();

        if let Some(message) = self.latest_message().await? {
            if sender.try_send(message).is_err() {
                debug!("[{}] Client {} closed before first snapshot", self.token, client_id);
                return Ok(client_id);
            }
        }

        self.clients.write().await.insert(client_id, sender);
        Ok(client_id)
    }

    pub async fn remove_client(&self, client_id: &ClientId) {
        self.clients.write().await.remove(client_id);
    }

    /// Send the latest snapshot to every subscriber. Returns the number of deliveries.
    pub async fn broadcast(&self) -> GatewayResult<usize> {
        // Fan out over a copy of the subscriber set
        let clients: Vec<(ClientId, mpsc::Sender<Message>)> = {
            let clients = self.clients.read().await;
            if clients.is_empty() {
                return Ok(0);
            }
            clients.iter().map(|(id, sender)| (*id, sender.clone())).collect()
        };

        let Some(message) = self.latest_message().await? else {
            return Ok(0);
        };

        let mut delivered = 0;
        let mut failed_clients = Vec::new();
        for (client_id, sender) in clients {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("[{}] Client {} is not keeping up, dropping it", self.token, client_id);
                    failed_clients.push(client_id);
                }
                Err(TrySendError::Closed(_)) => failed_clients.push(client_id),
            }
        }

        if !failed_clients.is_empty() {
            let mut clients = self.clients.write().await;
            for client_id in &failed_clients {
                clients.remove(client_id);
            }
            debug!("[{}] Dropped {} closed clients", self.token, failed_clients.len());
        }

        Ok(delivered)
    }

    /// Send a close frame to every subscriber and forget them
    pub async fn close_all(&self) {
        let clients: Vec<_> = self.clients.write().await.drain().collect();
        for (_, sender) in &clients {
            let _ = sender.try_send(Message::Close(None));
        }
        if !clients.is_empty() {
            info!("[{}] Closed {} subscriber connections", self.token, clients.len());
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Broadcast on a fixed interval until `shutdown` flips to true
    pub fn spawn_broadcast_task(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);

        tokio::spawn(async move {
            // Subscribers already got the latest snapshot on connect
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = broadcaster.broadcast().await {
                            error!("[{}] Snapshot broadcast error: {}", broadcaster.token, e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("[{}] Broadcast task stopped", broadcaster.token);
        })
    }

    async fn latest_message(&self) -> GatewayResult<Option<Message>> {
        match self.cache.latest().await {
            Some(snapshot) => Ok(Some(Message::Text(serde_json::to_string(snapshot.as_ref())?))),
            None => Ok(None),
        }
    }
}
