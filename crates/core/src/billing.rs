//! Billing mode applied to a submission.
//!
//! The source of the mode (per-account plan, admin override) is a
//! caller concern; it is always passed explicitly into the coordinator
//! so that the charged amount is a pure function of the request.

use serde::{Deserialize, Serialize};

/// How a submission is billed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    /// Normal operation: the full table cost is reserved.
    #[default]
    Standard,
    /// No credits are reserved (internal accounts, support comps).
    Waived,
}

/// The amount actually reserved for a submission.
pub fn effective_cost(mode: BillingMode, table_cost: i64) -> i64 {
    match mode {
        BillingMode::Standard => table_cost,
        BillingMode::Waived => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_charges_table_cost() {
        assert_eq!(effective_cost(BillingMode::Standard, 7), 7);
    }

    #[test]
    fn waived_charges_nothing() {
        assert_eq!(effective_cost(BillingMode::Waived, 7), 0);
    }

    #[test]
    fn default_mode_is_standard() {
        assert_eq!(BillingMode::default(), BillingMode::Standard);
    }
}
