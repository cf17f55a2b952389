//! Account balances and the transaction lifecycle.
//!
//! This module implements the core ledger functionality:
//! - Account and transaction domain types
//! - Balance sign rules per account kind
//! - The balance mutator, the only writer of cached balances
//! - Per-day balance history
//! - Error types for ledger operations
//! - Ledger service for creating, updating, deleting and restoring transactions

pub mod balance;
pub mod error;
pub mod history;
pub mod mutator;
pub mod service;
pub mod types;

#[cfg(test)]
mod mutator_props;

pub use balance::{BalanceChange, BalanceRule};
pub use error::LedgerError;
pub use history::{BalanceHistoryEntry, BalanceHistoryRecorder, ChangeType};
pub use mutator::{LedgerMutator, Posting};
pub use service::{CreatedTransaction, LedgerService};
pub use types::{
    Account, AccountKind, LedgerEffect, NewAccount, NewTransaction, Tombstone, TombstoneEntity,
    Transaction, TransactionChanges, TransactionType,
};
