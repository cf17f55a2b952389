//! Core business logic for Fintrack.
//!
//! This crate keeps account balances consistent with their transactions,
//! materializes recurring transactions and reconciles offline edits. It has
//! ZERO web or database dependencies; persistence sits behind the
//! `storage::LedgerStore` trait.
//!
//! # Modules
//!
//! - `ledger` - Balances, balance history and the transaction lifecycle
//! - `recurring` - Recurring templates and the due-occurrence engine
//! - `sync` - Offline sync reconciliation and conflict detection
//! - `storage` - Unit-of-work store abstraction and the in-memory store
//! - `notify` - Outbound ledger events
//! - `clock` - Injectable time source

pub mod clock;
pub mod ledger;
pub mod notify;
pub mod recurring;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod test_support;
