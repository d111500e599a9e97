//! Job entity models.

use mirage_core::job::StateId;
use mirage_core::types::{DbId, JobId, Timestamp};
use mirage_core::{CoreError, JobKind, JobState};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub id: JobId,
    pub account_id: DbId,
    pub kind: String,
    pub state_id: StateId,
    pub params: serde_json::Value,
    pub progress_percent: i16,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub provider_handle: Option<String>,
    /// Fixed at submission; never recomputed after dispatch.
    pub credits_charged: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl JobRow {
    pub fn state(&self) -> Result<JobState, CoreError> {
        JobState::from_id(self.state_id)
    }

    pub fn kind(&self) -> Result<JobKind, CoreError> {
        JobKind::from_code(&self.kind)
    }
}

/// Insert payload for a new job, assembled by the coordinator.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub account_id: DbId,
    pub kind: JobKind,
    pub params: serde_json::Value,
    pub credits_charged: i64,
}
