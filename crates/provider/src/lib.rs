//! Compute provider abstraction.
//!
//! The lifecycle coordinator talks to the GPU fleet exclusively
//! through [`ComputeProvider`]. Two implementations exist behind the
//! trait: [`RemoteProvider`](remote::RemoteProvider), an HTTP client
//! for the real fleet broker, and
//! [`SimulatedProvider`](simulator::SimulatedProvider), a
//! deterministic in-process stand-in for development and tests. The
//! coordinator cannot tell them apart.

pub mod config;
pub mod remote;
pub mod simulator;

use async_trait::async_trait;
use mirage_core::{GenerationParams, JobKind};
use serde::{Deserialize, Serialize};

pub use config::{ProviderConfig, ProviderMode};
pub use remote::RemoteProvider;
pub use simulator::SimulatedProvider;

// ---------------------------------------------------------------------------
// Contract types
// ---------------------------------------------------------------------------

/// Result of a successful submission: the opaque handle used for all
/// later polling, plus the provider's own duration estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub handle: String,
    pub estimated_secs: i64,
}

/// Coarse execution state reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Running,
    Completed,
    Failed,
}

/// A point-in-time status snapshot for one dispatched unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub state: ProviderState,
    /// Completion percentage (0-100). Providers may report it
    /// non-monotonically; the job store discards regressions.
    pub progress: i16,
    /// Result reference, present when `state` is `Completed`.
    pub result: Option<serde_json::Value>,
    /// Error description, present when `state` is `Failed`.
    pub error: Option<String>,
    /// Intermediate artifact (e.g. a low-res frame) available while
    /// the work is still running. Passed through to watchers, never
    /// persisted.
    pub preview: Option<serde_json::Value>,
}

/// Errors from provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request failed (network, DNS, TLS, timeout).
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with a non-2xx status.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The provider refused the submission outright.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// No work is known under the given handle.
    #[error("Unknown provider handle: {0}")]
    UnknownHandle(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A remote compute fleet able to run generation jobs.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Submit a unit of work. Must return (or fail) within a short
    /// bounded timeout; an unreachable provider is a dispatch failure,
    /// never an indefinite hang.
    async fn submit(
        &self,
        kind: JobKind,
        params: &GenerationParams,
    ) -> Result<Dispatch, ProviderError>;

    /// Query current status for a handle. Side-effect free; the caller
    /// owns the polling cadence and stops at the first terminal state.
    async fn poll(&self, handle: &str) -> Result<ProviderStatus, ProviderError>;

    /// Request cancellation of a dispatched unit of work.
    ///
    /// Best-effort extension point: callers that cannot cancel fall
    /// back to the timeout path.
    async fn cancel(&self, handle: &str) -> Result<(), ProviderError>;
}
