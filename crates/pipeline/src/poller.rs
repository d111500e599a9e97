//! Fixed-cadence reconciliation sweep.
//!
//! The poller periodically lists every non-terminal job and asks the
//! coordinator to reconcile it against the provider. Jobs older than
//! the configured maximum duration are expired instead, which is the
//! backstop for providers that never answer. Errors on one job never
//! stop the sweep; the job is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::store::JobStore;
use crate::PipelineError;

/// Upper bound on jobs examined per sweep.
const SWEEP_LIMIT: i64 = 200;

/// Orchestration timing configuration loaded from environment
/// variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between reconciliation sweeps.
    pub poll_interval: Duration,
    /// A job older than this is expired and refunded.
    pub max_job_duration: Duration,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default |
    /// |-------------------------|---------|
    /// | `POLL_INTERVAL_SECS`    | `2`     |
    /// | `MAX_JOB_DURATION_SECS` | `1800`  |
    pub fn from_env() -> Self {
        let poll_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let max_secs: u64 = std::env::var("MAX_JOB_DURATION_SECS")
            .unwrap_or_else(|_| "1800".into())
            .parse()
            .expect("MAX_JOB_DURATION_SECS must be a valid u64");

        Self {
            poll_interval: Duration::from_secs(poll_secs),
            max_job_duration: Duration::from_secs(max_secs),
        }
    }
}

/// Background task reconciling dispatched jobs with the provider.
pub struct Poller {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn JobStore>,
    config: PipelineConfig,
}

impl Poller {
    pub fn new(
        coordinator: Arc<Coordinator>,
        store: Arc<dyn JobStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            coordinator,
            store,
            config,
        }
    }

    /// Run sweeps until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_job_duration_secs = self.config.max_job_duration.as_secs(),
            "Reconciliation poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
    }

    /// One pass over every non-terminal job.
    pub async fn sweep_once(&self) -> Result<(), PipelineError> {
        let jobs = self.store.list_unfinished(SWEEP_LIMIT).await?;
        let max_secs = self.config.max_job_duration.as_secs() as i64;

        for job in jobs {
            let elapsed = (Utc::now() - job.created_at).num_seconds();
            let outcome = if elapsed >= max_secs {
                self.coordinator.expire(&job).await.map(|_| ())
            } else {
                self.coordinator.reconcile(&job).await
            };
            if let Err(e) = outcome {
                tracing::error!(job_id = %job.id, error = %e, "Failed to reconcile job");
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
