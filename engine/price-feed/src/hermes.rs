//! Pyth Hermes streaming adapter
//!
//! Outbound: `{"type":"subscribe","ids":[..]}`.
//! Inbound: `{"type":"price_update","price_feed":{"id","price":{"price","expo","publish_time"}}}`,
//! either one object per frame or an array of them. Subscription acknowledgements arrive as
//! `{"type":"response","status":..}`.

use crate::config::FeedConfig;
use crate::connector::{OracleConnector, OracleStream, PriceBatch};
use crate::error::{FeedError, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use index_core::{normalize_feed_key, LivePriceTick};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Decoded content of one inbound frame
#[derive(Debug, Default, PartialEq)]
pub struct HermesFrame {
    pub batch: PriceBatch,
    pub subscription_error: Option<String>,
}

enum Item {
    Tick(LivePriceTick),
    Malformed,
    Ignored,
}

/// Subscribe request for a set of feed keys
pub fn subscribe_message(feed_keys: &[String]) -> String {
    serde_json::json!({ "type": "subscribe", "ids": feed_keys }).to_string()
}

/// Decode one text frame. Malformed items are counted and dropped individually.
pub fn parse_frame(text: &str, received_at: DateTime<Utc>) -> HermesFrame {
    let mut frame = HermesFrame::default();

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!("Dropping undecodable oracle frame: {}", e);
            frame.batch.malformed = 1;
            return frame;
        }
    };

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    for item in &items {
        if let Some(error) = subscription_error(item) {
            frame.subscription_error = Some(error);
            continue;
        }
        match parse_item(item, received_at) {
            Item::Tick(tick) => frame.batch.ticks.push(tick),
            Item::Malformed => frame.batch.malformed += 1,
            Item::Ignored => {}
        }
    }

    frame
}

fn subscription_error(item: &Value) -> Option<String> {
    if item.get("type").and_then(Value::as_str) != Some("response") {
        return None;
    }
    if item.get("status").and_then(Value::as_str) == Some("error") {
        let message = item.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        return Some(message.to_string());
    }
    None
}

fn parse_item(item: &Value, received_at: DateTime<Utc>) -> Item {
    match item.get("type").and_then(Value::as_str) {
        Some("price_update") => {}
        Some(_) => return Item::Ignored,
        None => return Item::Malformed,
    }

    parse_price_feed(item.get("price_feed"), received_at).map_or(Item::Malformed, Item::Tick)
}

fn parse_price_feed(feed: Option<&Value>, received_at: DateTime<Utc>) -> Option<LivePriceTick> {
    let feed = feed?;
    let id = feed.get("id")?.as_str()?;
    let price = feed.get("price")?;

    let mantissa = number_field(price.get("price")?)?;
    let expo = i32::try_from(price.get("expo")?.as_i64()?).ok()?;
    let value = mantissa * 10f64.powi(expo);
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let observed_at = price
        .get("publish_time")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(received_at);

    Some(LivePriceTick { feed_key: normalize_feed_key(id), price: value, observed_at })
}

/// Hermes encodes integers as strings; accept both encodings
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Opens Hermes WebSocket subscriptions
pub struct HermesConnector {
    stream_url: String,
}

impl HermesConnector {
    pub fn new(config: &FeedConfig) -> Self {
        Self { stream_url: config.stream_url.clone() }
    }
}

#[async_trait::async_trait]
impl OracleConnector for HermesConnector {
    async fn connect(&self, feed_keys: &[String]) -> Result<Box<dyn OracleStream>> {
        let url = Url::parse(&self.stream_url)?;
        let (mut ws, _) = connect_async(url).await?;

        ws.send(Message::Text(subscribe_message(feed_keys))).await?;

        info!("Subscribed to {} oracle feeds at {}", feed_keys.len(), self.stream_url);

        Ok(Box::new(HermesStream { ws }))
    }
}

pub struct HermesStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl OracleStream for HermesStream {
    async fn next_batch(&mut self) -> Result<Option<PriceBatch>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame = parse_frame(&text, Utc::now());
                    if let Some(error) = frame.subscription_error {
                        return Err(FeedError::Subscription(error));
                    }
                    if !frame.batch.is_empty() {
                        return Ok(Some(frame.batch));
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.ws.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!("Oracle closed the stream: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(FeedError::WebSocket(e)),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_100, 0).unwrap()
    }

    #[test]
    fn test_subscribe_message() {
        let message = subscribe_message(&["aaa".to_string(), "bbb".to_string()]);
        let value: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["ids"], serde_json::json!(["aaa", "bbb"]));
    }

    #[test]
    fn test_parse_single_update() {
        let text = r#"{"type":"price_update","price_feed":{"id":"0xE62D","price":{"price":"6000000000000","conf":"100","expo":-8,"publish_time":1700000000}}}"#;
        let frame = parse_frame(text, now());

        assert_eq!(frame.batch.malformed, 0);
        assert_eq!(frame.batch.ticks.len(), 1);
        let tick = &frame.batch.ticks[0];
        assert_eq!(tick.feed_key, "e62d");
        assert!((tick.price - 60_000.0).abs() < 1e-6);
        assert_eq!(tick.observed_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_array_drops_malformed_items() {
        let text = r#"[
            {"type":"price_update","price_feed":{"id":"aaa","price":{"price":150,"expo":0}}},
            {"type":"price_update","price_feed":{"id":"bbb","price":{"price":"oops","expo":-2}}},
            {"type":"price_update","price_feed":{"id":"ccc"}},
            {"type":"price_update","price_feed":{"id":"ddd","price":{"price":"12345","expo":-2}}}
        ]"#;
        let frame = parse_frame(text, now());

        assert_eq!(frame.batch.malformed, 2);
        let keys: Vec<&str> = frame.batch.ticks.iter().map(|t| t.feed_key.as_str()).collect();
        assert_eq!(keys, vec!["aaa", "ddd"]);
        assert!((frame.batch.ticks[1].price - 123.45).abs() < 1e-9);
        assert_eq!(frame.batch.ticks[0].observed_at, now());
    }

    #[test]
    fn test_parse_subscription_responses() {
        let ok = parse_frame(r#"{"type":"response","status":"success"}"#, now());
        assert!(ok.batch.is_empty());
        assert_eq!(ok.subscription_error, None);

        let rejected =
            parse_frame(r#"{"type":"response","status":"error","error":"unknown id"}"#, now());
        assert_eq!(rejected.subscription_error.as_deref(), Some("unknown id"));
    }

    #[test]
    fn test_parse_garbage_counts_one_malformed() {
        let frame = parse_frame("not json at all", now());
        assert_eq!(frame.batch.malformed, 1);
        assert!(frame.batch.ticks.is_empty());
    }

    #[test]
    fn test_negative_price_is_malformed() {
        let text = r#"{"type":"price_update","price_feed":{"id":"aaa","price":{"price":"-5","expo":0}}}"#;
        let frame = parse_frame(text, now());
        assert_eq!(frame.batch.malformed, 1);
    }
}
