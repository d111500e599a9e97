//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the hub the lifecycle coordinator publishes into
//! and the WebSocket fanout router consumes from. It is shared via
//! `Arc<EventBus>` across the application.

use mirage_core::types::{DbId, JobId};
use mirage_core::JobState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// An event produced by the orchestration pipeline.
///
/// One `JobUpdated` is published per applied state/progress transition;
/// duplicate or stale provider reports never reach the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job's stored state or progress changed.
    JobUpdated {
        job_id: JobId,
        account_id: DbId,
        state: JobState,
        /// Completion percentage (0-100), advisory.
        progress: i16,
        /// Result reference; set only on terminal success.
        result: Option<serde_json::Value>,
        /// Human-readable error; set only on terminal failure.
        error: Option<String>,
    },

    /// An intermediate artifact (e.g. a low-res frame) from the
    /// provider, passed through to watchers without persistence.
    PreviewFrame {
        job_id: JobId,
        account_id: DbId,
        data: serde_json::Value,
    },

    /// The account's available balance moved (consume or refund).
    BalanceChanged { account_id: DbId, available: i64 },
}

impl JobEvent {
    /// The account this event concerns, used for account-scoped fanout.
    pub fn account_id(&self) -> DbId {
        match self {
            Self::JobUpdated { account_id, .. }
            | Self::PreviewFrame { account_id, .. }
            | Self::BalanceChanged { account_id, .. } => *account_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are
    /// dropped and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently
    /// dropped; the job store remains the source of truth.
    pub fn publish(&self, event: JobEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
