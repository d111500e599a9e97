//! Mirage event bus.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] — the canonical event envelope for job lifecycle
//!   changes, preview frames, and balance movements.
//!
//! Delivery is best-effort and at-most-once per subscriber: there is
//! no persistent queue of missed events, and a client that was
//! disconnected recovers by re-reading the job store.

pub mod bus;

pub use bus::{EventBus, JobEvent};
