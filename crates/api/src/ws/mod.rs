//! WebSocket infrastructure for real-time job status delivery.
//!
//! Provides connection and subscription management, the bus-to-socket
//! fanout router, heartbeat monitoring, and the HTTP upgrade handler
//! used by Axum routes.

mod handler;
mod heartbeat;
pub mod hub;
pub mod messages;
mod router;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use hub::FanoutHub;
pub use messages::{ClientMessage, ServerMessage, Topic};
pub use router::JobEventRouter;
