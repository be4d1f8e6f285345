//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`LedgerEvent`]s (download request status
//! transitions) to any number of subscribers. Share it via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shutter_core::types::RequestId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// LedgerEvent
// ---------------------------------------------------------------------------

/// A status transition of one download request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    /// The request that changed.
    pub request_id: RequestId,

    /// Owner of the request. Subscribers use it to scope invalidation.
    pub user_id: String,

    /// Status name after the transition (`"pending"`, `"processing"`, ...).
    pub status: String,

    /// When the transition was observed (UTC).
    pub timestamp: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn new(request_id: RequestId, user_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            request_id,
            user_id: user_id.into(),
            status: status.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: LedgerEvent) {
        tracing::debug!(
            request_id = %event.request_id,
            status = %event.status,
            "Ledger transition published",
        );
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
