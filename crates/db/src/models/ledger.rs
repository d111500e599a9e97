//! Credit ledger models.

use mirage_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the append-only `ledger_entries` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: DbId,
    pub account_id: DbId,
    pub job_kind: String,
    pub amount: i64,
    /// `consume` or `refund`.
    pub entry_type: String,
    pub reason: String,
    pub created_at: Timestamp,
}

/// Net credits consumed for one job kind (consume minus refund).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KindConsumption {
    pub job_kind: String,
    pub credits: i64,
}

/// Balance snapshot returned to callers: what is left plus where the
/// spent credits went.
#[derive(Debug, Clone, Serialize)]
pub struct CreditBalance {
    pub available: i64,
    pub consumed_by_kind: Vec<KindConsumption>,
}
