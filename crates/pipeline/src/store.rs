//! Storage seams for the coordinator.
//!
//! Production uses the Postgres-backed implementations, which delegate
//! to the repositories in `mirage-db`. The traits exist so that the
//! coordinator's reservation, refund, and transition logic can run
//! against in-memory doubles in tests.

use async_trait::async_trait;
use mirage_core::types::{DbId, JobId};
use mirage_core::JobKind;
use mirage_db::models::job::{JobRow, NewJob};
use mirage_db::models::ledger::CreditBalance;
use mirage_db::repositories::job_repo::JobRepo;
use mirage_db::repositories::ledger_repo::{LedgerError, LedgerRepo};
use mirage_db::DbPool;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Persistent job records with guarded state transitions.
///
/// Every transition method returns `true` only when it actually changed
/// the row; callers publish events and trigger refunds strictly on
/// `true`, which keeps duplicate provider reports harmless.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, input: &NewJob) -> Result<JobRow, sqlx::Error>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRow>, sqlx::Error>;

    async fn list_by_account(
        &self,
        account_id: DbId,
        limit: Option<i64>,
    ) -> Result<Vec<JobRow>, sqlx::Error>;

    /// `queued → dispatched`, recording the provider handle.
    async fn mark_dispatched(
        &self,
        job_id: JobId,
        provider_handle: &str,
    ) -> Result<bool, sqlx::Error>;

    /// Apply a progress report; stale or regressive reports change
    /// nothing.
    async fn apply_progress(&self, job_id: JobId, percent: i16) -> Result<bool, sqlx::Error>;

    /// Finalize as `completed`. Idempotent.
    async fn complete(
        &self,
        job_id: JobId,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error>;

    /// Finalize as `failed`. Idempotent.
    async fn fail(&self, job_id: JobId, error_message: &str) -> Result<bool, sqlx::Error>;

    /// Non-terminal jobs, oldest first, for the reconciliation sweep.
    async fn list_unfinished(&self, limit: i64) -> Result<Vec<JobRow>, sqlx::Error>;
}

/// Account credit balance operations.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Atomically check and debit `amount` credits. Returns the balance
    /// remaining after the debit.
    async fn reserve_and_consume(
        &self,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        reason: &str,
    ) -> Result<i64, LedgerError>;

    /// Credit `amount` back. Returns the balance after the refund.
    async fn refund(
        &self,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        reason: &str,
    ) -> Result<i64, LedgerError>;

    async fn balance(&self, account_id: DbId) -> Result<CreditBalance, LedgerError>;
}

// ---------------------------------------------------------------------------
// Postgres implementations
// ---------------------------------------------------------------------------

/// [`JobStore`] backed by the `jobs` table.
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: &NewJob) -> Result<JobRow, sqlx::Error> {
        JobRepo::create(&self.pool, input).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        JobRepo::find_by_id(&self.pool, id).await
    }

    async fn list_by_account(
        &self,
        account_id: DbId,
        limit: Option<i64>,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        JobRepo::list_by_account(&self.pool, account_id, limit).await
    }

    async fn mark_dispatched(
        &self,
        job_id: JobId,
        provider_handle: &str,
    ) -> Result<bool, sqlx::Error> {
        JobRepo::mark_dispatched(&self.pool, job_id, provider_handle).await
    }

    async fn apply_progress(&self, job_id: JobId, percent: i16) -> Result<bool, sqlx::Error> {
        JobRepo::apply_progress(&self.pool, job_id, percent).await
    }

    async fn complete(
        &self,
        job_id: JobId,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        JobRepo::complete(&self.pool, job_id, result).await
    }

    async fn fail(&self, job_id: JobId, error_message: &str) -> Result<bool, sqlx::Error> {
        JobRepo::fail(&self.pool, job_id, error_message).await
    }

    async fn list_unfinished(&self, limit: i64) -> Result<Vec<JobRow>, sqlx::Error> {
        JobRepo::list_unfinished(&self.pool, limit).await
    }
}

/// [`CreditLedger`] backed by the `accounts` and `ledger_entries`
/// tables.
pub struct PgCreditLedger {
    pool: DbPool,
}

impl PgCreditLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn reserve_and_consume(
        &self,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        reason: &str,
    ) -> Result<i64, LedgerError> {
        LedgerRepo::reserve_and_consume(&self.pool, account_id, kind, amount, reason).await?;
        let balance = LedgerRepo::balance(&self.pool, account_id).await?;
        Ok(balance.available)
    }

    async fn refund(
        &self,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        reason: &str,
    ) -> Result<i64, LedgerError> {
        LedgerRepo::refund(&self.pool, account_id, kind, amount, reason).await?;
        let balance = LedgerRepo::balance(&self.pool, account_id).await?;
        Ok(balance.available)
    }

    async fn balance(&self, account_id: DbId) -> Result<CreditBalance, LedgerError> {
        LedgerRepo::balance(&self.pool, account_id).await
    }
}
