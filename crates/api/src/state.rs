use std::sync::Arc;

use mirage_pipeline::Coordinator;

use crate::config::ServerConfig;
use crate::ws::FanoutHub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: mirage_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket fanout hub (browser clients).
    pub hub: Arc<FanoutHub>,
    /// Lifecycle coordinator driving submissions.
    pub coordinator: Arc<Coordinator>,
    /// Event bus the coordinator publishes into.
    pub bus: Arc<mirage_events::EventBus>,
}
