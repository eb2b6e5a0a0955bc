//! Status messages pushed from the watcher to any listening control surface.
//!
//! Delivery is best-effort: `notify` has no return value and a missing
//! listener is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Progress of a single-shot search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Searching,
    Waiting,
    Completed,
    Error,
}

impl TrackingStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            TrackingStatus::Searching => "🔍",
            TrackingStatus::Waiting => "⏳",
            TrackingStatus::Completed => "✅",
            TrackingStatus::Error => "❌",
        }
    }
}

/// Messages from the watcher to the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum StatusMessage {
    #[serde(rename_all = "camelCase")]
    StatsUpdate { added_count: u64 },
    StatusUpdate {
        status: TrackingStatus,
        message: String,
    },
}

impl StatusMessage {
    pub fn status(status: TrackingStatus, message: impl Into<String>) -> Self {
        StatusMessage::StatusUpdate {
            status,
            message: message.into(),
        }
    }
}

/// Requests from the control surface to the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    GetStats,
}

/// Reply to [`ControlRequest::GetStats`]; also the snapshot the watcher publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub added_count: u64,
    pub is_enabled: bool,
}

pub trait StatusNotifier: Send + Sync {
    fn notify(&self, message: StatusMessage);
}

/// Fans status messages out to every subscriber; drops them when nobody listens.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<StatusMessage>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.tx.subscribe()
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn notify(&self, message: StatusMessage) {
        tracing::debug!(?message, "status");
        let _ = self.tx.send(message);
    }
}
