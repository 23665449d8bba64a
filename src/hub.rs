//! # Event Hub
//!
//! Single-writer, multi-subscriber fan-out of typed messages. Publication
//! never blocks: each subscriber has a bounded backlog and a subscriber
//! that falls behind loses its oldest messages, counted on the hub.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Kind tag carried on every hub message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubMessageKind {
    Metrics,
    JobState,
    Incident,
    Audit,
}

/// An opaque tagged message broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: HubMessageKind,
    pub job_id: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HubMessage {
    pub fn new(kind: HubMessageKind, job_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Default per-subscriber backlog depth
pub const DEFAULT_BACKLOG: usize = 64;

/// Fan-out hub. Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<HubMessage>,
    dropped: Arc<AtomicU64>,
}

impl EventHub {
    pub fn new(backlog: usize) -> Self {
        let (tx, _) = broadcast::channel(backlog.max(1));
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a message to all current subscribers. Never blocks; with no
    /// subscribers the message is discarded.
    pub fn publish(&self, message: HubMessage) {
        trace!(kind = ?message.kind, job_id = ?message.job_id, "hub publish");
        let _ = self.tx.send(message);
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> HubSubscription {
        HubSubscription {
            rx: self.tx.subscribe(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total messages lost across all subscribers since start.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }
}

/// A subscriber's bounded inbox. Dropping the subscription unregisters it.
pub struct HubSubscription {
    rx: broadcast::Receiver<HubMessage>,
    dropped: Arc<AtomicU64>,
}

impl HubSubscription {
    /// Receive the next message. When the backlog overflowed, the skipped
    /// count is added to the hub's drop counter and reception continues
    /// with the oldest retained message. Returns `None` once the hub is
    /// gone.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive for draining in tests and pollers.
    pub fn try_recv(&mut self) -> Option<HubMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }
}
