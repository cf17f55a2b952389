//! Per-account, per-day balance snapshots.
//!
//! This is a snapshot log, not an event log: one entry per account per day,
//! and the last write of the day wins. The account's cached balance stays the
//! source of truth.

use chrono::NaiveDate;
use fintrack_shared::types::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storage::{StorageError, UnitOfWork};

/// What moved the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Account opened with a starting balance.
    Opening,
    /// Income applied.
    Income,
    /// Expense applied.
    Expense,
    /// Transfer received.
    TransferIn,
    /// Transfer sent.
    TransferOut,
    /// A previous effect was reverted.
    Reversal,
}

/// Balance of one account at the end of one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceHistoryEntry {
    /// The account ID.
    pub account_id: AccountId,
    /// Day of the snapshot.
    pub date: NaiveDate,
    /// Balance after the change.
    pub balance: Decimal,
    /// Kind of the last change that day.
    pub change_type: ChangeType,
    /// Signed delta of the last change that day.
    pub change_amount: Decimal,
}

/// Writes balance history entries.
pub struct BalanceHistoryRecorder;

impl BalanceHistoryRecorder {
    /// Upserts the (account, date) entry inside `uow`.
    pub fn record<U: UnitOfWork>(
        uow: &mut U,
        account_id: AccountId,
        date: NaiveDate,
        balance: Decimal,
        change_type: ChangeType,
        change_amount: Decimal,
    ) -> Result<BalanceHistoryEntry, StorageError> {
        let entry = BalanceHistoryEntry {
            account_id,
            date,
            balance,
            change_type,
            change_amount,
        };
        uow.upsert_balance_history(&entry)?;
        Ok(entry)
    }
}
