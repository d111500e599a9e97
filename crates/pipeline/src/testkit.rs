//! In-memory doubles for coordinator and poller tests.
//!
//! `MemStore` and `MemLedger` mirror the transition guards and the
//! atomic check-and-debit of the Postgres repositories, so the
//! orchestration tests exercise the same `bool`-gated semantics the
//! real database enforces.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mirage_core::types::{DbId, JobId};
use mirage_core::{GenerationParams, JobKind, JobState};
use mirage_db::models::job::{JobRow, NewJob};
use mirage_db::models::ledger::{CreditBalance, KindConsumption};
use mirage_db::repositories::ledger_repo::LedgerError;
use mirage_provider::{
    ComputeProvider, Dispatch, ProviderError, ProviderState, ProviderStatus,
};

use crate::store::{CreditLedger, JobStore};

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemStore {
    jobs: Mutex<HashMap<JobId, JobRow>>,
}

impl MemStore {
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }

    /// The single job in the store; panics if there is not exactly one.
    pub fn only_job(&self) -> JobRow {
        let jobs = self.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1, "expected exactly one job");
        jobs.values().next().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for MemStore {
    async fn create(&self, input: &NewJob) -> Result<JobRow, sqlx::Error> {
        let now = Utc::now();
        let row = JobRow {
            id: input.id,
            account_id: input.account_id,
            kind: input.kind.code().to_string(),
            state_id: JobState::Queued.id(),
            params: input.params.clone(),
            progress_percent: 0,
            result: None,
            error_message: None,
            provider_handle: None,
            credits_charged: input.credits_charged,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(input.id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn list_by_account(
        &self,
        account_id: DbId,
        limit: Option<i64>,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let mut rows: Vec<JobRow> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.unwrap_or(50).clamp(1, 100) as usize);
        Ok(rows)
    }

    async fn mark_dispatched(
        &self,
        job_id: JobId,
        provider_handle: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(row) if row.state_id == JobState::Queued.id() => {
                row.state_id = JobState::Dispatched.id();
                row.provider_handle = Some(provider_handle.to_string());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_progress(&self, job_id: JobId, percent: i16) -> Result<bool, sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        // Same guard as the SQL statement: a dispatched row always
        // accepts its first report, a processing row only on strictly
        // higher progress.
        match jobs.get_mut(&job_id) {
            Some(row)
                if row.state_id == JobState::Dispatched.id()
                    || (row.state_id == JobState::Processing.id()
                        && row.progress_percent < percent) =>
            {
                row.state_id = JobState::Processing.id();
                row.progress_percent = percent;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        job_id: JobId,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(row) if !is_terminal(row.state_id) => {
                row.state_id = JobState::Completed.id();
                row.result = Some(result.clone());
                row.progress_percent = 100;
                row.completed_at = Some(Utc::now());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, job_id: JobId, error_message: &str) -> Result<bool, sqlx::Error> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(row) if !is_terminal(row.state_id) => {
                row.state_id = JobState::Failed.id();
                row.error_message = Some(error_message.to_string());
                row.completed_at = Some(Utc::now());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_unfinished(&self, limit: i64) -> Result<Vec<JobRow>, sqlx::Error> {
        let mut rows: Vec<JobRow> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|row| !is_terminal(row.state_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

fn is_terminal(state_id: i16) -> bool {
    state_id == JobState::Completed.id() || state_id == JobState::Failed.id()
}

// ---------------------------------------------------------------------------
// MemLedger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerInner {
    balances: HashMap<DbId, i64>,
    /// (account, kind, amount, entry_type)
    entries: Vec<(DbId, JobKind, i64, &'static str)>,
}

#[derive(Default)]
pub struct MemLedger {
    inner: Mutex<LedgerInner>,
}

impl MemLedger {
    pub fn with_account(account_id: DbId, credits: i64) -> Self {
        let ledger = Self::default();
        ledger
            .inner
            .lock()
            .unwrap()
            .balances
            .insert(account_id, credits);
        ledger
    }

    pub fn available(&self, account_id: DbId) -> i64 {
        *self
            .inner
            .lock()
            .unwrap()
            .balances
            .get(&account_id)
            .unwrap_or(&0)
    }

    pub fn refund_count(&self, account_id: DbId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|(account, _, _, entry_type)| *account == account_id && *entry_type == "refund")
            .count()
    }
}

#[async_trait]
impl CreditLedger for MemLedger {
    async fn reserve_and_consume(
        &self,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        _reason: &str,
    ) -> Result<i64, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let available = *inner
            .balances
            .get(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            });
        }
        inner.balances.insert(account_id, available - amount);
        inner.entries.push((account_id, kind, amount, "consume"));
        Ok(available - amount)
    }

    async fn refund(
        &self,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        _reason: &str,
    ) -> Result<i64, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let available = *inner
            .balances
            .get(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        inner.balances.insert(account_id, available + amount);
        inner.entries.push((account_id, kind, amount, "refund"));
        Ok(available + amount)
    }

    async fn balance(&self, account_id: DbId) -> Result<CreditBalance, LedgerError> {
        let inner = self.inner.lock().unwrap();
        let available = *inner
            .balances
            .get(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let mut net: HashMap<&'static str, i64> = HashMap::new();
        for (account, kind, amount, entry_type) in &inner.entries {
            if *account == account_id {
                let signed = if *entry_type == "consume" { *amount } else { -amount };
                *net.entry(kind.code()).or_default() += signed;
            }
        }
        let mut consumed_by_kind: Vec<KindConsumption> = net
            .into_iter()
            .map(|(job_kind, credits)| KindConsumption {
                job_kind: job_kind.to_string(),
                credits,
            })
            .collect();
        consumed_by_kind.sort_by(|a, b| a.job_kind.cmp(&b.job_kind));
        Ok(CreditBalance {
            available,
            consumed_by_kind,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Provider double with scripted poll responses.
///
/// `poll` pops the front of the queue; when the queue is empty it
/// reports running at 0%, so unsolicited sweeps never surprise a test.
#[derive(Default)]
pub struct ScriptedProvider {
    reject_submissions: Mutex<bool>,
    poll_queue: Mutex<VecDeque<Result<ProviderStatus, ProviderError>>>,
    submitted: Mutex<u64>,
    cancelled: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn reject_submissions(&self) {
        *self.reject_submissions.lock().unwrap() = true;
    }

    pub fn push_status(&self, status: ProviderStatus) {
        self.poll_queue.lock().unwrap().push_back(Ok(status));
    }

    pub fn push_poll_error(&self, error: ProviderError) {
        self.poll_queue.lock().unwrap().push_back(Err(error));
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeProvider for ScriptedProvider {
    async fn submit(
        &self,
        _kind: JobKind,
        _params: &GenerationParams,
    ) -> Result<Dispatch, ProviderError> {
        if *self.reject_submissions.lock().unwrap() {
            return Err(ProviderError::Rejected("scripted rejection".into()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        *submitted += 1;
        Ok(Dispatch {
            handle: format!("fake-{submitted}"),
            estimated_secs: 30,
        })
    }

    async fn poll(&self, _handle: &str) -> Result<ProviderStatus, ProviderError> {
        match self.poll_queue.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(ProviderStatus {
                state: ProviderState::Running,
                progress: 0,
                result: None,
                error: None,
                preview: None,
            }),
        }
    }

    async fn cancel(&self, handle: &str) -> Result<(), ProviderError> {
        self.cancelled.lock().unwrap().push(handle.to_string());
        Ok(())
    }
}
