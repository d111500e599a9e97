//! Subscription-aware WebSocket connection registry.
//!
//! [`FanoutHub`] tracks every open socket together with the topics it
//! asked for, plus a reverse topic index so a broadcast only walks the
//! connections that care. Delivery is best-effort: a closed channel is
//! skipped and the connection cleans itself up in its receive loop.
//! `remove` clears both sides of the index, so a departed connection
//! leaves no subscriptions behind.

use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::ws::Message;
use mirage_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

use crate::ws::messages::{ServerMessage, Topic};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
struct HubConnection {
    sender: WsSender,
    topics: HashSet<Topic>,
    #[allow(dead_code)]
    connected_at: Timestamp,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<String, HubConnection>,
    by_topic: HashMap<Topic, HashSet<String>>,
}

/// Manages all active WebSocket connections and their subscriptions.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc`
/// and shared across the application.
#[derive(Default)]
pub struct FanoutHub {
    inner: RwLock<HubInner>,
}

impl FanoutHub {
    /// Create a new, empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller
    /// can forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = HubConnection {
            sender: tx,
            topics: HashSet::new(),
            connected_at: chrono::Utc::now(),
        };
        self.inner.write().await.connections.insert(conn_id, conn);
        rx
    }

    /// Remove a connection and every subscription it holds.
    pub async fn remove(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.remove(conn_id) {
            for topic in conn.topics {
                if let Some(subscribers) = inner.by_topic.get_mut(&topic) {
                    subscribers.remove(conn_id);
                    if subscribers.is_empty() {
                        inner.by_topic.remove(&topic);
                    }
                }
            }
        }
    }

    /// Subscribe a connection to a topic.
    ///
    /// Returns `false` if the connection is unknown (already removed).
    pub async fn subscribe(&self, conn_id: &str, topic: Topic) -> bool {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.get_mut(conn_id) else {
            return false;
        };
        conn.topics.insert(topic);
        inner
            .by_topic
            .entry(topic)
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    /// Drop one subscription. Unknown subscriptions are a no-op.
    pub async fn unsubscribe(&self, conn_id: &str, topic: Topic) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(conn_id) {
            conn.topics.remove(&topic);
        }
        if let Some(subscribers) = inner.by_topic.get_mut(&topic) {
            subscribers.remove(conn_id);
            if subscribers.is_empty() {
                inner.by_topic.remove(&topic);
            }
        }
    }

    /// Deliver a message to every connection subscribed to any of the
    /// given topics.
    ///
    /// A connection subscribed to more than one matching topic still
    /// receives a single copy. Closed channels are silently skipped.
    /// Returns the number of connections the message was sent to.
    pub async fn fanout(&self, topics: &[Topic], message: &ServerMessage) -> usize {
        let inner = self.inner.read().await;

        let mut recipients: HashSet<&String> = HashSet::new();
        for topic in topics {
            if let Some(subscribers) = inner.by_topic.get(topic) {
                recipients.extend(subscribers);
            }
        }

        let frame = Message::Text(message.to_json().into());
        let mut count = 0;
        for conn_id in recipients {
            if let Some(conn) = inner.connections.get(conn_id) {
                if conn.sender.send(frame.clone()).is_ok() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Send a message directly to one connection.
    pub async fn send_to(&self, conn_id: &str, message: &ServerMessage) {
        let inner = self.inner.read().await;
        if let Some(conn) = inner.connections.get(conn_id) {
            let _ = conn.sender.send(Message::Text(message.to_json().into()));
        }
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Number of live subscriptions across all topics.
    pub async fn subscription_count(&self) -> usize {
        self.inner
            .read()
            .await
            .by_topic
            .values()
            .map(HashSet::len)
            .sum()
    }

    /// Send a Ping frame to every connected client.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones.
    pub async fn ping_all(&self) {
        let inner = self.inner.read().await;
        for conn in inner.connections.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.connections.len();
        for conn in inner.connections.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        inner.connections.clear();
        inner.by_topic.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }
}
