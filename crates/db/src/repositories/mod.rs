pub mod job_repo;
pub mod ledger_repo;

pub use job_repo::JobRepo;
pub use ledger_repo::{LedgerError, LedgerRepo};
