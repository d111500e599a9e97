use mirage_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `accounts` table.
///
/// Account provisioning belongs to the auth/billing collaborator; this
/// subsystem only reads the row and moves `credits_available`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: DbId,
    pub display_name: String,
    pub credits_available: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
