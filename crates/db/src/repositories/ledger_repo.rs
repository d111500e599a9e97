//! Repository for accounts and the credit ledger.
//!
//! Reservation takes a `SELECT ... FOR UPDATE` row lock on the
//! account, so concurrent reservations for one account serialize at
//! the database and the balance can never be driven negative.

use mirage_core::types::DbId;
use mirage_core::JobKind;
use sqlx::PgPool;

use crate::models::account::Account;
use crate::models::ledger::{CreditBalance, KindConsumption, LedgerEntry};

/// Column list for `ledger_entries` queries.
const ENTRY_COLUMNS: &str = "id, account_id, job_kind, amount, entry_type, reason, created_at";

/// Errors from ledger operations.
///
/// `InsufficientCredits` is an expected business outcome: the caller
/// converts it into a typed rejection, never into a 500.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Account {0} not found")]
    AccountNotFound(DbId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Provides atomic credit reservation, refunds, and balance reads.
pub struct LedgerRepo;

impl LedgerRepo {
    /// Atomically verify the balance and consume `amount` credits.
    ///
    /// Runs in one transaction: lock the account row, check
    /// `credits_available >= amount`, debit, and append the consume
    /// entry. Either every step commits or none does.
    pub async fn reserve_and_consume(
        pool: &PgPool,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut tx = pool.begin().await?;

        let available: Option<i64> =
            sqlx::query_scalar("SELECT credits_available FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;

        let available = available.ok_or(LedgerError::AccountNotFound(account_id))?;

        if available < amount {
            // Dropping the transaction rolls back the row lock.
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            });
        }

        sqlx::query(
            "UPDATE accounts \
             SET credits_available = credits_available - $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            "INSERT INTO ledger_entries (account_id, job_kind, amount, entry_type, reason) \
             VALUES ($1, $2, $3, 'consume', $4) \
             RETURNING {ENTRY_COLUMNS}"
        );
        let entry = sqlx::query_as::<_, LedgerEntry>(&query)
            .bind(account_id)
            .bind(kind.code())
            .bind(amount)
            .bind(reason)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            account_id,
            kind = kind.code(),
            amount,
            remaining = available - amount,
            "Credits consumed",
        );

        Ok(entry)
    }

    /// Credit `amount` back to the account with a compensating entry.
    ///
    /// Used only for jobs that failed after consuming credits.
    pub async fn refund(
        pool: &PgPool,
        account_id: DbId,
        kind: JobKind,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE accounts \
             SET credits_available = credits_available + $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let query = format!(
            "INSERT INTO ledger_entries (account_id, job_kind, amount, entry_type, reason) \
             VALUES ($1, $2, $3, 'refund', $4) \
             RETURNING {ENTRY_COLUMNS}"
        );
        let entry = sqlx::query_as::<_, LedgerEntry>(&query)
            .bind(account_id)
            .bind(kind.code())
            .bind(amount)
            .bind(reason)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(account_id, kind = kind.code(), amount, reason, "Credits refunded");

        Ok(entry)
    }

    /// Read the committed balance plus net consumption per job kind.
    pub async fn balance(pool: &PgPool, account_id: DbId) -> Result<CreditBalance, LedgerError> {
        let available: Option<i64> =
            sqlx::query_scalar("SELECT credits_available FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(pool)
                .await?;

        let available = available.ok_or(LedgerError::AccountNotFound(account_id))?;

        let consumed_by_kind = sqlx::query_as::<_, KindConsumption>(
            "SELECT job_kind, \
                    SUM(CASE entry_type WHEN 'consume' THEN amount ELSE -amount END)::BIGINT \
                        AS credits \
             FROM ledger_entries \
             WHERE account_id = $1 \
             GROUP BY job_kind \
             ORDER BY job_kind",
        )
        .bind(account_id)
        .fetch_all(pool)
        .await?;

        Ok(CreditBalance {
            available,
            consumed_by_kind,
        })
    }

    /// Find an account by ID.
    pub async fn find_account(
        pool: &PgPool,
        account_id: DbId,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "SELECT id, display_name, credits_available, created_at, updated_at \
             FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(pool)
        .await
    }
}
