//! Job lifecycle orchestration.
//!
//! The [`Coordinator`](coordinator::Coordinator) drives every job from
//! submission to a terminal state: validate, reserve credits, persist,
//! dispatch to the compute provider, and later reconcile provider
//! status back into the store. The [`Poller`](poller::Poller) runs the
//! reconciliation sweep on a fixed cadence and enforces the job
//! timeout.
//!
//! Storage is reached through the [`JobStore`](store::JobStore) and
//! [`CreditLedger`](store::CreditLedger) traits so the orchestration
//! logic can be exercised without a database.

pub mod coordinator;
pub mod poller;
pub mod store;

#[cfg(test)]
mod testkit;

use mirage_core::CoreError;
use mirage_db::repositories::ledger_repo::LedgerError;
use mirage_provider::ProviderError;

pub use coordinator::{Coordinator, SubmitReceipt};
pub use poller::{PipelineConfig, Poller};
pub use store::{CreditLedger, JobStore, PgCreditLedger, PgJobStore};

/// Errors from lifecycle orchestration.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The provider refused or could not accept the submission. By the
    /// time this surfaces, the job row is `failed` and any reserved
    /// credits are refunded.
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] ProviderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
