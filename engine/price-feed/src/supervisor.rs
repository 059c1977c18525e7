//! Live price feed supervisor
//!
//! One `LivePriceFeed` owns at most one oracle session. A session task walks
//! `Disconnected -> Connecting -> Subscribed` and falls back to `Disconnected` after a
//! transport failure, waiting a fixed backoff before reconnecting with the same key set.
//! `stop()` moves the feed to the terminal `Stopped` state.

use crate::config::FeedConfig;
use crate::connector::{OracleConnector, OracleStream, PriceBatch, PriceTickHandler};
use crate::error::{FeedError, Result};
use crate::metrics::{FeedMetrics, FeedMetricsSnapshot};
use index_core::normalize_feed_key;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state of a feed, observable through `LivePriceFeed::subscribe_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

struct FeedSession {
    feed_keys: Vec<String>,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Everything a session task needs, shared with the owning feed
#[derive(Clone)]
struct SessionContext {
    name: String,
    connector: Arc<dyn OracleConnector>,
    handler: Arc<dyn PriceTickHandler>,
    state: Arc<watch::Sender<FeedState>>,
    metrics: Arc<FeedMetrics>,
    backoff: Duration,
    connect_timeout: Duration,
}

enum SessionEnd {
    Cancelled,
    Disconnected(String),
}

pub struct LivePriceFeed {
    context: SessionContext,
    session: Mutex<Option<FeedSession>>,
    stopped: AtomicBool,
}

impl LivePriceFeed {
    pub fn new(
        name: impl Into<String>,
        config: &FeedConfig,
        connector: Arc<dyn OracleConnector>,
        handler: Arc<dyn PriceTickHandler>,
    ) -> Self {
        let (state, _) = watch::channel(FeedState::Disconnected);
        Self {
            context: SessionContext {
                name: name.into(),
                connector,
                handler,
                state: Arc::new(state),
                metrics: Arc::new(FeedMetrics::default()),
                backoff: config.reconnect_backoff(),
                connect_timeout: config.connect_timeout(),
            },
            session: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Replace the active subscription with one for `feed_keys`.
    ///
    /// Any open session is fully torn down before the new one is spawned. An empty key
    /// set leaves the current session untouched.
    pub async fn start(&self, feed_keys: Vec<String>) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(FeedError::Stopped);
        }

        let feed_keys = dedup_keys(feed_keys);
        if feed_keys.is_empty() {
            debug!("[{}] No feed keys to subscribe, leaving feed unchanged", self.context.name);
            return Ok(());
        }

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            close_session(previous).await;
        }

        // stop() may have run while we waited for the lock
        if self.stopped.load(Ordering::SeqCst) {
            return Err(FeedError::Stopped);
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let context = self.context.clone();
        let keys = feed_keys.clone();
        let handle = tokio::spawn(async move {
            run_session(context, keys, cancel_rx).await;
        });

        info!("[{}] Started live price feed for {} keys", self.context.name, feed_keys.len());

        *session = Some(FeedSession { feed_keys, cancel, handle });
        Ok(())
    }

    /// Close the transport and cancel pending reconnects. Idempotent.
    pub async fn stop(&self) {
        let already_stopped = self.stopped.swap(true, Ordering::SeqCst);

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            close_session(previous).await;
        }
        self.context.state.send_replace(FeedState::Stopped);

        if !already_stopped {
            info!("[{}] Live price feed stopped", self.context.name);
        }
    }

    /// Keys of the running session, empty when idle
    pub async fn active_keys(&self) -> Vec<String> {
        self.session.lock().await.as_ref().map(|s| s.feed_keys.clone()).unwrap_or_default()
    }

    pub fn state(&self) -> FeedState {
        *self.context.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.context.state.subscribe()
    }

    pub fn metrics(&self) -> FeedMetricsSnapshot {
        self.context.metrics.snapshot()
    }
}

fn dedup_keys(feed_keys: Vec<String>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(feed_keys.len());
    for key in feed_keys {
        let key = normalize_feed_key(&key);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

async fn close_session(session: FeedSession) {
    let _ = session.cancel.send(true);
    if let Err(e) = session.handle.await {
        error!("Feed session task ended abnormally: {}", e);
    }
}

async fn run_session(context: SessionContext, feed_keys: Vec<String>, mut cancel: watch::Receiver<bool>) {
    let mut attempts: u64 = 0;

    loop {
        if *cancel.borrow() {
            break;
        }

        context.state.send_replace(FeedState::Connecting);
        if attempts > 0 {
            context.metrics.record_reconnect();
        }
        attempts += 1;

        let connected = tokio::select! {
            _ = cancel.changed() => break,
            result = tokio::time::timeout(context.connect_timeout, context.connector.connect(&feed_keys)) => result,
        };

        let end = match connected {
            Ok(Ok(stream)) => {
                context.metrics.record_connect();
                context.state.send_replace(FeedState::Subscribed);
                info!("[{}] Oracle subscription active ({} keys)", context.name, feed_keys.len());
                stream_until_end(&context, stream, &mut cancel).await
            }
            Ok(Err(e)) => SessionEnd::Disconnected(format!("connect failed: {e}")),
            Err(_) => SessionEnd::Disconnected("connect timed out".to_string()),
        };

        match end {
            SessionEnd::Cancelled => break,
            SessionEnd::Disconnected(reason) => {
                context.state.send_replace(FeedState::Disconnected);
                warn!(
                    "[{}] Oracle feed disconnected: {}. Reconnecting in {:?}",
                    context.name, reason, context.backoff
                );
            }
        }

        tokio::select! {
            _ = cancel.changed() => break,
            _ = tokio::time::sleep(context.backoff) => {}
        }
    }

    debug!("[{}] Feed session task exiting", context.name);
}

async fn stream_until_end(
    context: &SessionContext,
    mut stream: Box<dyn OracleStream>,
    cancel: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let end = loop {
        let next = tokio::select! {
            _ = cancel.changed() => None,
            next = stream.next_batch() => Some(next),
        };

        match next {
            None => break SessionEnd::Cancelled,
            Some(Ok(Some(batch))) => apply_batch(context, batch).await,
            Some(Ok(None)) => break SessionEnd::Disconnected("stream ended".to_string()),
            Some(Err(e)) => break SessionEnd::Disconnected(e.to_string()),
        }
    };

    if let Err(e) = stream.close().await {
        debug!("[{}] Error closing oracle transport: {}", context.name, e);
    }

    end
}

async fn apply_batch(context: &SessionContext, batch: PriceBatch) {
    context.metrics.record_batch(batch.ticks.len(), batch.malformed);
    if batch.malformed > 0 {
        debug!("[{}] Dropped {} malformed oracle items", context.name, batch.malformed);
    }
    if !batch.ticks.is_empty() {
        context.handler.on_ticks(&batch.ticks).await;
    }
}
