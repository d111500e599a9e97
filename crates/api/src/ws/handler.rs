use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use mirage_core::types::DbId;
use mirage_db::repositories::job_repo::JobRepo;

use crate::auth::AccountId;
use crate::state::AppState;
use crate::ws::messages::{ClientMessage, ServerMessage, Topic};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The caller must present the same identity header as the REST
/// routes; subscriptions are checked against it, so a connection can
/// only watch its own account and jobs.
pub async fn ws_handler(
    account: AccountId,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, account.0))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with the fanout hub.
///   2. Spawns a sender task that forwards messages from the hub channel.
///   3. Processes subscription frames on the current task.
///   4. Cleans up on disconnect, dropping every subscription.
async fn handle_socket(socket: WebSocket, state: AppState, account_id: DbId) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, account_id, "WebSocket connected");

    // Register and get the receiver for outbound messages.
    let mut rx = state.hub.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: process inbound subscription frames.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_frame(&state, &conn_id, account_id, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: remove connection (and its subscriptions) and abort the
    // sender task.
    state.hub.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Parse and apply one inbound frame, replying with an ack or an error.
async fn handle_frame(state: &AppState, conn_id: &str, account_id: DbId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            state
                .hub
                .send_to(
                    conn_id,
                    &ServerMessage::Error {
                        message: format!("Malformed message: {e}"),
                    },
                )
                .await;
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { topic } => {
            if let Err(message) = authorize_topic(state, account_id, topic).await {
                state
                    .hub
                    .send_to(conn_id, &ServerMessage::Error { message })
                    .await;
                return;
            }
            state.hub.subscribe(conn_id, topic).await;
            state
                .hub
                .send_to(conn_id, &ServerMessage::Subscribed { topic })
                .await;
        }
        ClientMessage::Unsubscribe { topic } => {
            state.hub.unsubscribe(conn_id, topic).await;
            state
                .hub
                .send_to(conn_id, &ServerMessage::Unsubscribed { topic })
                .await;
        }
    }
}

/// Check that the authenticated account may watch the topic.
///
/// Jobs owned by other accounts are reported as unknown rather than
/// forbidden.
async fn authorize_topic(state: &AppState, account_id: DbId, topic: Topic) -> Result<(), String> {
    match topic {
        Topic::Account { account_id: wanted } if wanted != account_id => {
            Err("Cannot subscribe to another account".to_string())
        }
        Topic::Account { .. } => Ok(()),
        Topic::Job { job_id } => match JobRepo::find_by_id(&state.pool, job_id).await {
            Ok(Some(job)) if job.account_id == account_id => Ok(()),
            Ok(_) => Err(format!("Unknown job: {job_id}")),
            Err(e) => {
                tracing::error!(error = %e, "Job lookup failed during subscribe");
                Err("Subscription temporarily unavailable".to_string())
            }
        },
    }
}
