//! Provider selection and connection configuration.

use std::time::Duration;

/// Which [`ComputeProvider`](crate::ComputeProvider) implementation to
/// run behind the trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Deterministic in-process simulator (default for development).
    Simulator,
    /// HTTP client against the real fleet broker.
    Remote,
}

/// Provider configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub mode: ProviderMode,
    /// Base URL of the remote broker (remote mode only).
    pub base_url: String,
    /// Per-request timeout for submit/poll/cancel calls.
    pub request_timeout: Duration,
    /// Simulator time compression: 10 means a 120s estimate finishes
    /// in 12s of wall clock (simulator mode only).
    pub sim_speedup: u32,
}

impl ProviderConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `PROVIDER_MODE`            | `simulator`             |
    /// | `PROVIDER_URL`             | `http://localhost:8700` |
    /// | `PROVIDER_TIMEOUT_SECS`    | `10`                    |
    /// | `PROVIDER_SIM_SPEEDUP`     | `10`                    |
    pub fn from_env() -> Self {
        let mode = match std::env::var("PROVIDER_MODE").as_deref() {
            Ok("remote") => ProviderMode::Remote,
            _ => ProviderMode::Simulator,
        };

        let base_url =
            std::env::var("PROVIDER_URL").unwrap_or_else(|_| "http://localhost:8700".into());

        let timeout_secs: u64 = std::env::var("PROVIDER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("PROVIDER_TIMEOUT_SECS must be a valid u64");

        let sim_speedup: u32 = std::env::var("PROVIDER_SIM_SPEEDUP")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("PROVIDER_SIM_SPEEDUP must be a valid u32");

        Self {
            mode,
            base_url,
            request_timeout: Duration::from_secs(timeout_secs),
            sim_speedup,
        }
    }
}
