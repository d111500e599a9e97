//! Deterministic local provider simulator.
//!
//! Replaces the remote fleet during development and in tests. Each
//! submission records a start instant and a target duration derived
//! from the same estimate the user sees; progress is then a pure
//! function of elapsed time, so repeated polls advance monotonically
//! and two polls at the same instant agree.
//!
//! Failure paths are driven by markers in the prompt text:
//! `[sim:reject]` makes the submission itself fail (dispatch-failure
//! path), `[sim:fail]` lets the job run to 50% and then report a
//! provider-side error.

use std::collections::HashMap;

use async_trait::async_trait;
use mirage_core::{pricing, GenerationParams, JobKind};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::{ComputeProvider, Dispatch, ProviderError, ProviderState, ProviderStatus};

/// Prompt marker that makes `submit` return an error.
pub const MARKER_REJECT: &str = "[sim:reject]";

/// Prompt marker that makes the job fail mid-flight.
pub const MARKER_FAIL: &str = "[sim:fail]";

/// Progress at which a `[sim:fail]` job reports its error.
const FAIL_AT_PERCENT: i16 = 50;

struct SimJob {
    started_at: Instant,
    duration: Duration,
    fail_midway: bool,
}

/// In-process [`ComputeProvider`] that advances state deterministically
/// over time.
pub struct SimulatedProvider {
    jobs: Mutex<HashMap<String, SimJob>>,
    /// Wall-clock compression factor (>= 1).
    speedup: u32,
}

impl SimulatedProvider {
    pub fn new(speedup: u32) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            speedup: speedup.max(1),
        }
    }

    fn status_of(job: &SimJob, handle: &str) -> ProviderStatus {
        let elapsed = job.started_at.elapsed();
        let percent = if job.duration.is_zero() {
            100
        } else {
            ((elapsed.as_secs_f64() / job.duration.as_secs_f64()) * 100.0).min(100.0) as i16
        };

        if job.fail_midway && percent >= FAIL_AT_PERCENT {
            return ProviderStatus {
                state: ProviderState::Failed,
                progress: FAIL_AT_PERCENT,
                result: None,
                error: Some("Simulated mid-flight failure".into()),
                preview: None,
            };
        }

        if percent >= 100 {
            ProviderStatus {
                state: ProviderState::Completed,
                progress: 100,
                result: Some(serde_json::json!({ "artifact": format!("sim://{handle}") })),
                error: None,
                preview: None,
            }
        } else {
            ProviderStatus {
                state: ProviderState::Running,
                progress: percent,
                result: None,
                error: None,
                // A frame becomes available once rendering has started.
                preview: (percent > 0).then(|| {
                    serde_json::json!({
                        "frame": format!("sim://{handle}/preview/{percent}")
                    })
                }),
            }
        }
    }
}

#[async_trait]
impl ComputeProvider for SimulatedProvider {
    async fn submit(
        &self,
        kind: JobKind,
        params: &GenerationParams,
    ) -> Result<Dispatch, ProviderError> {
        if params.prompt.contains(MARKER_REJECT) {
            return Err(ProviderError::Rejected(
                "Simulated submission rejection".into(),
            ));
        }

        let estimated_secs = pricing::estimate_secs(kind, params);
        let duration = Duration::from_secs_f64(estimated_secs as f64 / self.speedup as f64);
        let handle = format!("sim-{}", uuid::Uuid::new_v4());

        self.jobs.lock().await.insert(
            handle.clone(),
            SimJob {
                started_at: Instant::now(),
                duration,
                fail_midway: params.prompt.contains(MARKER_FAIL),
            },
        );

        tracing::debug!(
            kind = kind.code(),
            handle = %handle,
            estimated_secs,
            "Simulated generation started",
        );

        Ok(Dispatch {
            handle,
            estimated_secs,
        })
    }

    async fn poll(&self, handle: &str) -> Result<ProviderStatus, ProviderError> {
        let jobs = self.jobs.lock().await;
        let job = jobs
            .get(handle)
            .ok_or_else(|| ProviderError::UnknownHandle(handle.to_string()))?;
        Ok(Self::status_of(job, handle))
    }

    async fn cancel(&self, handle: &str) -> Result<(), ProviderError> {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(handle)
            .map(|_| ())
            .ok_or_else(|| ProviderError::UnknownHandle(handle.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
