//! Live progress notifications addressed to the owning user.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineEvent {
    ExecutionStarted,
    NodeStarted,
    NodeCompleted,
    NodeError,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    Waiting,
}

impl EngineEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEvent::ExecutionStarted => "executionStarted",
            EngineEvent::NodeStarted => "nodeStarted",
            EngineEvent::NodeCompleted => "nodeCompleted",
            EngineEvent::NodeError => "nodeError",
            EngineEvent::ExecutionCompleted => "executionCompleted",
            EngineEvent::ExecutionFailed => "executionFailed",
            EngineEvent::ExecutionCancelled => "executionCancelled",
            EngineEvent::Waiting => "waiting",
        }
    }
}

/// Delivery is best effort; the engine never waits on or checks it.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, user_id: Uuid, event: EngineEvent, payload: Value);
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: Uuid,
    pub event: EngineEvent,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Fans notifications out over a tokio broadcast channel. Transports
/// (SSE, websockets) subscribe and filter by `user_id`.
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn emit(&self, user_id: Uuid, event: EngineEvent, payload: Value) {
        let notification = Notification {
            user_id,
            event,
            payload,
            timestamp: Utc::now(),
        };
        // No receivers is fine.
        if self.tx.send(notification).is_err() {
            trace!(event = event.as_str(), "notification dropped, no subscribers");
        }
    }
}

/// Discards everything.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _user_id: Uuid, _event: EngineEvent, _payload: Value) {}
}
