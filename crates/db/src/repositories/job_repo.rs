//! Repository for the `jobs` table.
//!
//! Every state-changing statement carries its transition guard in the
//! WHERE clause, so the row itself enforces the state machine:
//! a terminal row never changes again, and stale progress never
//! overwrites newer progress. Callers learn whether anything changed
//! from the returned `bool` and broadcast only on `true`, which is
//! what makes duplicate reconciliations safe.

use mirage_core::job::StateId;
use mirage_core::types::{DbId, JobId};
use mirage_core::JobState;
use sqlx::PgPool;

use crate::models::job::{JobRow, NewJob};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, account_id, kind, state_id, params, progress_percent, \
    result, error_message, provider_handle, credits_charged, \
    created_at, updated_at, completed_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Terminal states: completed, failed.
const TERMINAL_STATES: [StateId; 2] = [
    JobState::Completed as StateId,
    JobState::Failed as StateId,
];

/// Provides CRUD and guarded state transitions for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job in `queued` state.
    ///
    /// `credits_charged` is written here, once, and no other statement
    /// in this repository touches the column.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, account_id, kind, state_id, params, credits_charged) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(input.id)
            .bind(input.account_id)
            .bind(input.kind.code())
            .bind(JobState::Queued.id())
            .bind(&input.params)
            .bind(input.credits_charged)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List an account's jobs, most recent first.
    pub async fn list_by_account(
        pool: &PgPool,
        account_id: DbId,
        limit: Option<i64>,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE account_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(account_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Record the provider handle and move `queued → dispatched`.
    ///
    /// Returns `false` if the job was not in `queued` (already
    /// dispatched, or finalized by a racing failure path).
    pub async fn mark_dispatched(
        pool: &PgPool,
        job_id: JobId,
        provider_handle: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state_id = $2, provider_handle = $3, updated_at = NOW() \
             WHERE id = $1 AND state_id = $4",
        )
        .bind(job_id)
        .bind(JobState::Dispatched.id())
        .bind(provider_handle)
        .bind(JobState::Queued.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a provider progress report, moving the job to `processing`.
    ///
    /// A report against a `dispatched` row always applies, even at 0%,
    /// so the first provider contact is visible to watchers. Once
    /// `processing`, progress is monotonic: a report at or below the
    /// stored percent affects zero rows and is discarded. Terminal rows
    /// never match.
    pub async fn apply_progress(
        pool: &PgPool,
        job_id: JobId,
        percent: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state_id = $2, progress_percent = $3, updated_at = NOW() \
             WHERE id = $1 \
               AND state_id IN ($4, $2) \
               AND (state_id = $4 OR progress_percent < $3)",
        )
        .bind(job_id)
        .bind(JobState::Processing.id())
        .bind(percent)
        .bind(JobState::Dispatched.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Finalize a job as `completed` with its result reference.
    ///
    /// Idempotent: a second completion (or a completion racing a
    /// failure) affects zero rows, so the caller broadcasts at most
    /// once for the transition.
    pub async fn complete(
        pool: &PgPool,
        job_id: JobId,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET state_id = $2, result = $3, progress_percent = 100, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND state_id NOT IN ($4, $5)",
        )
        .bind(job_id)
        .bind(JobState::Completed.id())
        .bind(result)
        .bind(TERMINAL_STATES[0])
        .bind(TERMINAL_STATES[1])
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Finalize a job as `failed` with a human-readable error.
    ///
    /// Same idempotency contract as [`complete`](Self::complete); the
    /// returned `bool` also gates the refund so it fires exactly once.
    pub async fn fail(
        pool: &PgPool,
        job_id: JobId,
        error_message: &str,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET state_id = $2, error_message = $3, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND state_id NOT IN ($4, $5)",
        )
        .bind(job_id)
        .bind(JobState::Failed.id())
        .bind(error_message)
        .bind(TERMINAL_STATES[0])
        .bind(TERMINAL_STATES[1])
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// List non-terminal jobs, oldest first, for the reconciliation
    /// sweep.
    pub async fn list_unfinished(pool: &PgPool, limit: i64) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE state_id NOT IN ($1, $2) \
             ORDER BY created_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(TERMINAL_STATES[0])
            .bind(TERMINAL_STATES[1])
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
