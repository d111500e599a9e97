pub mod account;
pub mod job;
pub mod ledger;

pub use account::Account;
pub use job::{JobRow, NewJob};
pub use ledger::{CreditBalance, KindConsumption, LedgerEntry};
