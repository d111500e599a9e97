//! Wire format for the status WebSocket.
//!
//! Clients send [`ClientMessage`] frames to manage subscriptions; the
//! server pushes [`ServerMessage`] frames. Both use a `type`-tagged
//! JSON envelope.

use mirage_core::types::{DbId, JobId};
use mirage_core::JobState;
use serde::{Deserialize, Serialize};

/// What a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Topic {
    /// Updates for one job.
    Job { job_id: JobId },
    /// Every event concerning one account (all its jobs plus balance
    /// changes).
    Account { account_id: DbId },
}

/// Inbound frames from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(flatten)]
        topic: Topic,
    },
    Unsubscribe {
        #[serde(flatten)]
        topic: Topic,
    },
}

/// Outbound frames to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        #[serde(flatten)]
        topic: Topic,
    },
    Unsubscribed {
        #[serde(flatten)]
        topic: Topic,
    },
    JobUpdate {
        job_id: JobId,
        state: JobState,
        progress: i16,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PreviewFrame {
        job_id: JobId,
        data: serde_json::Value,
    },
    Balance {
        account_id: DbId,
        available: i64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Serialize into a WebSocket text frame payload.
    pub fn to_json(&self) -> String {
        // Serialization of these variants cannot fail; every field is
        // plain data.
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"type\":\"error\",\"message\":\"serialization failure\"}".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn subscribe_frame_parses() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"subscribe","topic":"job","job_id":"{id}"}}"#);
        let msg: ClientMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            ClientMessage::Subscribe {
                topic: Topic::Job { job_id },
            } => assert_eq!(job_id, id),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_account_frame_parses() {
        let raw = r#"{"type":"unsubscribe","topic":"account","account_id":7}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Unsubscribe {
                topic: Topic::Account { account_id },
            } => assert_eq!(account_id, 7),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn job_update_serializes_with_tag_and_omits_empty_fields() {
        let msg = ServerMessage::JobUpdate {
            job_id: Uuid::nil(),
            state: JobState::Processing,
            progress: 55,
            result: None,
            error: None,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "job_update");
        assert_eq!(value["state"], "processing");
        assert_eq!(value["progress"], 55);
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn subscribed_ack_flattens_the_topic() {
        let msg = ServerMessage::Subscribed {
            topic: Topic::Account { account_id: 3 },
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "subscribed");
        assert_eq!(value["topic"], "account");
        assert_eq!(value["account_id"], 3);
    }
}
