//! Lifecycle coordinator: submission through finalization.
//!
//! One rule runs through everything here: the job row is the source of
//! truth, and only the call that actually changed it gets to publish
//! the matching event or trigger the refund. Transition methods on
//! [`JobStore`] return `true` exactly once per transition, so a
//! provider report replayed across two sweeps, or a completion racing
//! a timeout, produces one broadcast and at most one refund.

use std::sync::Arc;

use mirage_core::billing::{effective_cost, BillingMode};
use mirage_core::types::{DbId, JobId};
use mirage_core::{pricing, GenerationParams, JobKind, JobState};
use mirage_db::models::job::{JobRow, NewJob};
use mirage_events::{EventBus, JobEvent};
use mirage_provider::{ComputeProvider, ProviderError, ProviderState};
use serde::Serialize;

use crate::store::{CreditLedger, JobStore};
use crate::PipelineError;

/// What a successful submission hands back to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub state: JobState,
    /// Credits reserved for this job (0 under waived billing).
    pub credits_charged: i64,
    /// Provider's wall-clock estimate in seconds, advisory.
    pub estimated_secs: i64,
}

/// Drives jobs from submission to a terminal state.
pub struct Coordinator {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    provider: Arc<dyn ComputeProvider>,
    bus: Arc<EventBus>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        provider: Arc<dyn ComputeProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            ledger,
            provider,
            bus,
        }
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    /// Validate, reserve credits, persist, and dispatch a new job.
    ///
    /// Ordering matters: validation happens before any money moves, and
    /// the job row exists before the provider is contacted, so a
    /// dispatch failure always has a row to finalize and a reservation
    /// to refund.
    pub async fn submit(
        &self,
        account_id: DbId,
        kind: JobKind,
        params: GenerationParams,
        billing: BillingMode,
    ) -> Result<SubmitReceipt, PipelineError> {
        params.validate(kind)?;

        let cost = effective_cost(billing, pricing::cost_for(kind, &params));

        if cost > 0 {
            let remaining = self
                .ledger
                .reserve_and_consume(account_id, kind, cost, "generation reservation")
                .await?;
            self.bus.publish(JobEvent::BalanceChanged {
                account_id,
                available: remaining,
            });
        } else {
            // Waived billing skips the ledger but the account must
            // still exist.
            self.ledger.balance(account_id).await?;
        }

        let job = self
            .store
            .create(&NewJob {
                id: JobId::new_v4(),
                account_id,
                kind,
                params: serde_json::to_value(&params)?,
                credits_charged: cost,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            account_id,
            kind = kind.code(),
            credits_charged = cost,
            "Job created",
        );

        self.bus.publish(JobEvent::JobUpdated {
            job_id: job.id,
            account_id,
            state: JobState::Queued,
            progress: 0,
            result: None,
            error: None,
        });

        let dispatch = match self.provider.submit(kind, &params).await {
            Ok(dispatch) => dispatch,
            Err(e) => {
                self.finalize_failure(&job, &format!("Dispatch failed: {e}"), "dispatch failure")
                    .await?;
                return Err(e.into());
            }
        };

        let dispatched = self.store.mark_dispatched(job.id, &dispatch.handle).await?;
        if dispatched {
            self.bus.publish(JobEvent::JobUpdated {
                job_id: job.id,
                account_id,
                state: JobState::Dispatched,
                progress: 0,
                result: None,
                error: None,
            });
        } else {
            // The job was finalized while the submit call was in
            // flight. Don't leave the provider running orphaned work.
            tracing::warn!(job_id = %job.id, handle = %dispatch.handle, "Job finalized during dispatch, cancelling");
            let _ = self.provider.cancel(&dispatch.handle).await;
        }

        Ok(SubmitReceipt {
            job_id: job.id,
            state: if dispatched {
                JobState::Dispatched
            } else {
                JobState::Failed
            },
            credits_charged: cost,
            estimated_secs: dispatch.estimated_secs,
        })
    }

    // -----------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------

    /// Merge the provider's current view of one job into the store.
    ///
    /// Transient provider errors are logged and retried on the next
    /// sweep; only an authoritative answer moves the job.
    pub async fn reconcile(&self, job: &JobRow) -> Result<(), PipelineError> {
        let Some(handle) = job.provider_handle.as_deref() else {
            // Still between create and dispatch; nothing to ask about.
            return Ok(());
        };

        let status = match self.provider.poll(handle).await {
            Ok(status) => status,
            Err(ProviderError::UnknownHandle(_)) => {
                self.finalize_failure(job, "Provider lost track of this job", "provider failure")
                    .await?;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Provider poll failed, will retry");
                return Ok(());
            }
        };

        match status.state {
            ProviderState::Running => {
                if self.store.apply_progress(job.id, status.progress).await? {
                    self.bus.publish(JobEvent::JobUpdated {
                        job_id: job.id,
                        account_id: job.account_id,
                        state: JobState::Processing,
                        progress: status.progress,
                        result: None,
                        error: None,
                    });
                    // Preview frames ride along with applied progress,
                    // so a replayed report never rebroadcasts one.
                    if let Some(data) = status.preview {
                        self.bus.publish(JobEvent::PreviewFrame {
                            job_id: job.id,
                            account_id: job.account_id,
                            data,
                        });
                    }
                }
            }
            ProviderState::Completed => {
                let result = status.result.unwrap_or_else(|| serde_json::json!({}));
                if self.store.complete(job.id, &result).await? {
                    tracing::info!(job_id = %job.id, "Job completed");
                    self.bus.publish(JobEvent::JobUpdated {
                        job_id: job.id,
                        account_id: job.account_id,
                        state: JobState::Completed,
                        progress: 100,
                        result: Some(result),
                        error: None,
                    });
                }
            }
            ProviderState::Failed => {
                let message = status
                    .error
                    .unwrap_or_else(|| "Provider reported failure".to_string());
                self.finalize_failure(job, &message, "provider failure").await?;
            }
        }

        Ok(())
    }

    /// Finalize a job that exceeded the maximum allowed duration.
    ///
    /// Returns `true` if this call performed the finalization.
    pub async fn expire(&self, job: &JobRow) -> Result<bool, PipelineError> {
        if let Some(handle) = job.provider_handle.as_deref() {
            // Best effort; an unreachable provider must not block the
            // refund.
            if let Err(e) = self.provider.cancel(handle).await {
                tracing::debug!(job_id = %job.id, error = %e, "Cancel on timeout failed");
            }
        }
        self.finalize_failure(job, "Timed out waiting for the provider", "timeout refund")
            .await
    }

    // -----------------------------------------------------------------
    // Failure path
    // -----------------------------------------------------------------

    /// Move a job to `failed`, refund its reservation, and broadcast.
    ///
    /// The refund is gated on the store transition, so however many
    /// paths race toward failure (provider report, timeout, dispatch
    /// error), the account is credited back exactly once.
    async fn finalize_failure(
        &self,
        job: &JobRow,
        message: &str,
        refund_reason: &str,
    ) -> Result<bool, PipelineError> {
        if !self.store.fail(job.id, message).await? {
            return Ok(false);
        }

        tracing::info!(job_id = %job.id, reason = refund_reason, error = message, "Job failed");

        if job.credits_charged > 0 {
            let kind = job.kind()?;
            let available = self
                .ledger
                .refund(job.account_id, kind, job.credits_charged, refund_reason)
                .await?;
            self.bus.publish(JobEvent::BalanceChanged {
                account_id: job.account_id,
                available,
            });
        }

        self.bus.publish(JobEvent::JobUpdated {
            job_id: job.id,
            account_id: job.account_id,
            state: JobState::Failed,
            progress: job.progress_percent,
            result: None,
            error: Some(message.to_string()),
        });

        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MemLedger, MemStore, ScriptedProvider};
    use assert_matches::assert_matches;
    use mirage_core::Resolution;
    use mirage_db::repositories::ledger_repo::LedgerError;
    use mirage_provider::ProviderStatus;

    const ACCOUNT: DbId = 1;

    fn params() -> GenerationParams {
        GenerationParams {
            prompt: "a lighthouse at dusk".into(),
            source_image: None,
            duration_secs: 10,
            resolution: Resolution::Sd480,
            style_flags: vec![],
        }
    }

    struct Harness {
        store: Arc<MemStore>,
        ledger: Arc<MemLedger>,
        provider: Arc<ScriptedProvider>,
        bus: Arc<EventBus>,
        coordinator: Coordinator,
    }

    fn harness(initial_credits: i64) -> Harness {
        let store = Arc::new(MemStore::default());
        let ledger = Arc::new(MemLedger::with_account(ACCOUNT, initial_credits));
        let provider = Arc::new(ScriptedProvider::default());
        let bus = Arc::new(EventBus::default());
        let coordinator = Coordinator::new(
            store.clone(),
            ledger.clone(),
            provider.clone(),
            bus.clone(),
        );
        Harness {
            store,
            ledger,
            provider,
            bus,
            coordinator,
        }
    }

    fn running(progress: i16) -> ProviderStatus {
        ProviderStatus {
            state: ProviderState::Running,
            progress,
            result: None,
            error: None,
            preview: None,
        }
    }

    fn running_with_preview(progress: i16) -> ProviderStatus {
        ProviderStatus {
            preview: Some(serde_json::json!({"frame": format!("frame_{progress}")})),
            ..running(progress)
        }
    }

    fn completed() -> ProviderStatus {
        ProviderStatus {
            state: ProviderState::Completed,
            progress: 100,
            result: Some(serde_json::json!({"artifact": "clip_1"})),
            error: None,
            preview: None,
        }
    }

    fn failed(message: &str) -> ProviderStatus {
        ProviderStatus {
            state: ProviderState::Failed,
            progress: 40,
            result: None,
            error: Some(message.to_string()),
            preview: None,
        }
    }

    // -- submission ----------------------------------------------------

    #[tokio::test]
    async fn submit_reserves_exact_cost_and_dispatches() {
        let h = harness(100);
        let cost = pricing::cost_for(JobKind::TextToVideo, &params());

        let receipt = h
            .coordinator
            .submit(ACCOUNT, JobKind::TextToVideo, params(), BillingMode::Standard)
            .await
            .unwrap();

        assert_eq!(receipt.state, JobState::Dispatched);
        assert_eq!(receipt.credits_charged, cost);
        assert_eq!(h.ledger.available(ACCOUNT), 100 - cost);

        let job = h.store.find_by_id(receipt.job_id).await.unwrap().unwrap();
        assert_eq!(job.state().unwrap(), JobState::Dispatched);
        assert_eq!(job.credits_charged, cost);
        assert!(job.provider_handle.is_some());
    }

    #[tokio::test]
    async fn submit_rejects_invalid_params_without_touching_ledger() {
        let h = harness(100);
        let mut bad = params();
        bad.prompt = "  ".into();

        let result = h
            .coordinator
            .submit(ACCOUNT, JobKind::TextToVideo, bad, BillingMode::Standard)
            .await;

        assert_matches!(result, Err(PipelineError::Core(_)));
        assert_eq!(h.ledger.available(ACCOUNT), 100);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_insufficient_credits_without_creating_a_job() {
        let h = harness(1);

        let result = h
            .coordinator
            .submit(ACCOUNT, JobKind::TextToVideo, params(), BillingMode::Standard)
            .await;

        assert_matches!(
            result,
            Err(PipelineError::Ledger(LedgerError::InsufficientCredits { .. }))
        );
        assert_eq!(h.ledger.available(ACCOUNT), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_unknown_account() {
        let h = harness(100);

        let result = h
            .coordinator
            .submit(99, JobKind::TextToVideo, params(), BillingMode::Standard)
            .await;

        assert_matches!(
            result,
            Err(PipelineError::Ledger(LedgerError::AccountNotFound(99)))
        );
    }

    #[tokio::test]
    async fn waived_billing_reserves_nothing() {
        let h = harness(3);

        let receipt = h
            .coordinator
            .submit(ACCOUNT, JobKind::TextToVideo, params(), BillingMode::Waived)
            .await
            .unwrap();

        assert_eq!(receipt.credits_charged, 0);
        assert_eq!(h.ledger.available(ACCOUNT), 3);
    }

    #[tokio::test]
    async fn dispatch_failure_fails_the_job_and_refunds() {
        let h = harness(100);
        h.provider.reject_submissions();

        let result = h
            .coordinator
            .submit(ACCOUNT, JobKind::TextToVideo, params(), BillingMode::Standard)
            .await;

        assert_matches!(result, Err(PipelineError::Dispatch(_)));
        assert_eq!(h.ledger.available(ACCOUNT), 100);
        assert_eq!(h.ledger.refund_count(ACCOUNT), 1);

        let job = h.store.only_job();
        assert_eq!(job.state().unwrap(), JobState::Failed);
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn submit_publishes_balance_and_state_events() {
        let h = harness(100);
        let mut rx = h.bus.subscribe();

        h.coordinator
            .submit(ACCOUNT, JobKind::Suggestion, params(), BillingMode::Standard)
            .await
            .unwrap();

        assert_matches!(rx.recv().await.unwrap(), JobEvent::BalanceChanged { .. });
        assert_matches!(
            rx.recv().await.unwrap(),
            JobEvent::JobUpdated {
                state: JobState::Queued,
                ..
            }
        );
        assert_matches!(
            rx.recv().await.unwrap(),
            JobEvent::JobUpdated {
                state: JobState::Dispatched,
                ..
            }
        );
    }

    // -- reconciliation ------------------------------------------------

    async fn submitted_job(h: &Harness) -> JobRow {
        let receipt = h
            .coordinator
            .submit(ACCOUNT, JobKind::TextToVideo, params(), BillingMode::Standard)
            .await
            .unwrap();
        h.store.find_by_id(receipt.job_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn progress_reports_move_the_job_to_processing() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        h.provider.push_status(running(35));

        h.coordinator.reconcile(&job).await.unwrap();

        let job = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.state().unwrap(), JobState::Processing);
        assert_eq!(job.progress_percent, 35);
    }

    #[tokio::test]
    async fn running_report_at_zero_percent_moves_the_job_to_processing() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        let mut rx = h.bus.subscribe();
        h.provider.push_status(running(0));

        h.coordinator.reconcile(&job).await.unwrap();

        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.state().unwrap(), JobState::Processing);
        assert_eq!(refreshed.progress_percent, 0);
        assert_matches!(
            rx.try_recv().unwrap(),
            JobEvent::JobUpdated {
                state: JobState::Processing,
                progress: 0,
                ..
            }
        );

        // Once processing, a repeat at 0% is a stale report.
        h.provider.push_status(running(0));
        h.coordinator.reconcile(&refreshed).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_progress_publishes_nothing() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        h.provider.push_status(running(50));
        h.coordinator.reconcile(&job).await.unwrap();

        let mut rx = h.bus.subscribe();
        h.provider.push_status(running(30));
        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        h.coordinator.reconcile(&refreshed).await.unwrap();

        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.progress_percent, 50);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn preview_frames_ride_along_with_applied_progress() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        let mut rx = h.bus.subscribe();
        h.provider.push_status(running_with_preview(40));

        h.coordinator.reconcile(&job).await.unwrap();

        assert_matches!(
            rx.try_recv().unwrap(),
            JobEvent::JobUpdated {
                state: JobState::Processing,
                ..
            }
        );
        assert_matches!(rx.try_recv().unwrap(), JobEvent::PreviewFrame { .. });

        // A stale replay broadcasts neither the update nor the frame.
        h.provider.push_status(running_with_preview(10));
        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        h.coordinator.reconcile(&refreshed).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn completion_is_applied_once() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        let mut rx = h.bus.subscribe();

        h.provider.push_status(completed());
        h.coordinator.reconcile(&job).await.unwrap();

        // Same terminal report replayed on the next sweep.
        h.provider.push_status(completed());
        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        h.coordinator.reconcile(&refreshed).await.unwrap();

        assert_eq!(refreshed.state().unwrap(), JobState::Completed);
        assert_eq!(refreshed.progress_percent, 100);
        assert!(refreshed.result.is_some());

        assert_matches!(
            rx.try_recv().unwrap(),
            JobEvent::JobUpdated {
                state: JobState::Completed,
                ..
            }
        );
        // No second broadcast for the duplicate.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn provider_failure_refunds_exactly_once() {
        let h = harness(100);
        let job = submitted_job(&h).await;

        h.provider.push_status(failed("GPU OOM"));
        h.coordinator.reconcile(&job).await.unwrap();

        // Replayed failure across a second sweep.
        h.provider.push_status(failed("GPU OOM"));
        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        h.coordinator.reconcile(&refreshed).await.unwrap();

        assert_eq!(refreshed.state().unwrap(), JobState::Failed);
        assert_eq!(refreshed.error_message.as_deref(), Some("GPU OOM"));
        assert_eq!(h.ledger.available(ACCOUNT), 100);
        assert_eq!(h.ledger.refund_count(ACCOUNT), 1);
    }

    #[tokio::test]
    async fn transient_poll_errors_leave_the_job_untouched() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        h.provider.push_poll_error(ProviderError::Unreachable("timeout".into()));

        h.coordinator.reconcile(&job).await.unwrap();

        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.state().unwrap(), JobState::Dispatched);
        assert_eq!(h.ledger.available(ACCOUNT), 100 - job.credits_charged);
    }

    #[tokio::test]
    async fn unknown_handle_fails_and_refunds() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        h.provider
            .push_poll_error(ProviderError::UnknownHandle("fake-1".into()));

        h.coordinator.reconcile(&job).await.unwrap();

        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(refreshed.state().unwrap(), JobState::Failed);
        assert_eq!(h.ledger.available(ACCOUNT), 100);
    }

    // -- timeout -------------------------------------------------------

    #[tokio::test]
    async fn expire_cancels_fails_and_refunds_once() {
        let h = harness(100);
        let job = submitted_job(&h).await;

        assert!(h.coordinator.expire(&job).await.unwrap());
        // A racing second expiry is a no-op.
        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert!(!h.coordinator.expire(&refreshed).await.unwrap());

        assert_eq!(refreshed.state().unwrap(), JobState::Failed);
        assert_eq!(h.ledger.available(ACCOUNT), 100);
        assert_eq!(h.ledger.refund_count(ACCOUNT), 1);
        assert_eq!(h.provider.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn expire_after_completion_is_a_no_op() {
        let h = harness(100);
        let job = submitted_job(&h).await;
        h.provider.push_status(completed());
        h.coordinator.reconcile(&job).await.unwrap();

        let refreshed = h.store.find_by_id(job.id).await.unwrap().unwrap();
        assert!(!h.coordinator.expire(&refreshed).await.unwrap());
        assert_eq!(refreshed.state().unwrap(), JobState::Completed);
        assert_eq!(h.ledger.available(ACCOUNT), 100 - job.credits_charged);
    }

    // -- concurrency ---------------------------------------------------

    #[tokio::test]
    async fn concurrent_submissions_never_oversubscribe_the_balance() {
        // Credits for exactly two text-to-video jobs at Sd480 over 10s.
        let cost = pricing::cost_for(JobKind::TextToVideo, &params());
        let h = harness(cost * 2);
        let coordinator = Arc::new(h.coordinator);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move {
                c.submit(ACCOUNT, JobKind::TextToVideo, params(), BillingMode::Standard)
                    .await
            }));
        }

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(PipelineError::Ledger(LedgerError::InsufficientCredits { .. })) => {
                    rejected += 1
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 2);
        assert_eq!(rejected, 6);
        assert_eq!(h.ledger.available(ACCOUNT), 0);
    }
}
