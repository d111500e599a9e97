//! Bus-to-socket fanout.
//!
//! [`JobEventRouter`] subscribes to the in-process event bus and turns
//! each [`JobEvent`] into one [`ServerMessage`] delivered to the
//! connections watching the affected job or account. Delivery is
//! best-effort: a slow consumer that lags the broadcast channel simply
//! misses intermediate updates and catches up from the job store.

use std::sync::Arc;

use mirage_events::JobEvent;
use tokio::sync::broadcast;

use crate::ws::hub::FanoutHub;
use crate::ws::messages::{ServerMessage, Topic};

/// Routes pipeline events to subscribed WebSocket connections.
pub struct JobEventRouter {
    hub: Arc<FanoutHub>,
}

impl JobEventRouter {
    pub fn new(hub: Arc<FanoutHub>) -> Self {
        Self { hub }
    }

    /// Run the main routing loop.
    ///
    /// Subscribes to the event bus via `receiver` and processes each
    /// event. The loop exits when the channel is closed (i.e. the
    /// [`EventBus`](mirage_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<JobEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.route(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Status fanout lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, status fanout shutting down");
                    break;
                }
            }
        }
    }

    /// Deliver one event to every connection watching it.
    async fn route(&self, event: JobEvent) {
        let (topics, message) = match event {
            JobEvent::JobUpdated {
                job_id,
                account_id,
                state,
                progress,
                result,
                error,
            } => (
                vec![Topic::Job { job_id }, Topic::Account { account_id }],
                ServerMessage::JobUpdate {
                    job_id,
                    state,
                    progress,
                    result,
                    error,
                },
            ),
            JobEvent::PreviewFrame {
                job_id,
                account_id,
                data,
            } => (
                vec![Topic::Job { job_id }, Topic::Account { account_id }],
                ServerMessage::PreviewFrame { job_id, data },
            ),
            JobEvent::BalanceChanged {
                account_id,
                available,
            } => (
                vec![Topic::Account { account_id }],
                ServerMessage::Balance {
                    account_id,
                    available,
                },
            ),
        };

        let delivered = self.hub.fanout(&topics, &message).await;
        tracing::trace!(delivered, "Event routed to WebSocket subscribers");
    }
}
