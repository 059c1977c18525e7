//! Counters for the live price feed

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FeedMetrics {
    connects: AtomicU64,
    reconnects: AtomicU64,
    messages: AtomicU64,
    ticks_applied: AtomicU64,
    malformed_items: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedMetricsSnapshot {
    pub connects: u64,
    pub reconnects: u64,
    pub messages: u64,
    pub ticks_applied: u64,
    pub malformed_items: u64,
}

impl FeedMetrics {
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, ticks: usize, malformed: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.ticks_applied.fetch_add(ticks as u64, Ordering::Relaxed);
        self.malformed_items.fetch_add(malformed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedMetricsSnapshot {
        FeedMetricsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            ticks_applied: self.ticks_applied.load(Ordering::Relaxed),
            malformed_items: self.malformed_items.load(Ordering::Relaxed),
        }
    }
}
