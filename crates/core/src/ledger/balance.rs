//! Balance sign conventions.
//!
//! Transactions store a non-negative amount; the signed delta an account
//! receives depends on the transaction type and on the account's rule:
//!
//! - Income: `+amount` on the primary account.
//! - Expense: `-amount` on asset accounts, `+amount` on credit cards (debt grows).
//! - Transfer: the primary account gets the expense sign, the destination gets
//!   the mirrored sign (`+amount` on assets, `-amount` on credit cards).

use fintrack_shared::types::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::TransactionType;

/// Sign convention of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceRule {
    /// Balance is money held. Outflows decrease it.
    Asset,
    /// Balance is money owed. Outflows (spending) increase it.
    Liability,
}

impl BalanceRule {
    /// Delta for money leaving the account.
    #[must_use]
    pub fn outflow(self, amount: Decimal) -> Decimal {
        match self {
            Self::Asset => -amount,
            Self::Liability => amount,
        }
    }

    /// Delta for money arriving in the account.
    #[must_use]
    pub fn inflow(self, amount: Decimal) -> Decimal {
        -self.outflow(amount)
    }

    /// Delta on the primary account of a transaction.
    #[must_use]
    pub fn primary_delta(self, kind: TransactionType, amount: Decimal) -> Decimal {
        match kind {
            TransactionType::Income => amount,
            TransactionType::Expense | TransactionType::Transfer => self.outflow(amount),
        }
    }
}

/// A balance movement on one account.
///
/// `current_balance = previous_balance + delta` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// The account ID.
    pub account_id: AccountId,
    /// Signed delta applied.
    pub delta: Decimal,
    /// Balance before the change.
    pub previous_balance: Decimal,
    /// Balance after the change.
    pub current_balance: Decimal,
}

impl BalanceChange {
    /// Builds the change from the balance before it and the delta.
    #[must_use]
    pub fn new(account_id: AccountId, previous_balance: Decimal, delta: Decimal) -> Self {
        Self {
            account_id,
            delta,
            previous_balance,
            current_balance: previous_balance + delta,
        }
    }
}
