//! Client credit standing and the credit gate.
//!
//! [`evaluate`] is the one place the Green/Red/Blocked rule is decided.
//! Snapshots are refreshed on every board load and never outlive it,
//! since balances move with payments and invoices outside this system.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::ClientId;

/// Per-client financial standing as of the last board load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCreditSnapshot {
    pub client_id: ClientId,
    pub client_name: String,
    pub balance: Decimal,
    pub credit_limit: Decimal,
    pub hard_blocked: bool,
    /// At least one invoice is unpaid past the overdue threshold.
    pub has_overdue_invoice: bool,
}

/// Outcome of the credit gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    Green,
    /// Restricted: over limit or overdue.
    Red,
    Blocked,
}

impl CreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Red => "red",
            Self::Blocked => "blocked",
        }
    }
}

/// Classify a client for dispatch purposes.
pub fn evaluate(snapshot: &ClientCreditSnapshot) -> CreditStatus {
    if snapshot.hard_blocked {
        CreditStatus::Blocked
    } else if snapshot.balance <= snapshot.credit_limit && !snapshot.has_overdue_invoice {
        CreditStatus::Green
    } else {
        CreditStatus::Red
    }
}

impl ClientCreditSnapshot {
    pub fn status(&self) -> CreditStatus {
        evaluate(self)
    }

    /// Remaining credit; negative when over limit.
    pub fn headroom(&self) -> Decimal {
        self.credit_limit - self.balance
    }
}

/// Whether an invoice issued on `issued_on` and still unpaid on `today`
/// counts as overdue.
pub fn invoice_is_overdue(issued_on: NaiveDate, today: NaiveDate, overdue_after_days: i64) -> bool {
    (today - issued_on).num_days() > overdue_after_days
}
