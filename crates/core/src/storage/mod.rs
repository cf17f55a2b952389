//! Abstract storage for the ledger engine.
//!
//! The engine never touches a database directly. It talks to a `LedgerStore`,
//! which hands out `UnitOfWork`s: atomic, row-locked units that stage writes
//! and publish them all at once on `commit`.
//!
//! # Locking discipline
//!
//! A unit of work declares every row it will mutate up front as a `LockSet`.
//! The set is ordered (accounts by ascending id first), granted as a whole,
//! and held until the unit commits or is dropped. Mutating a row outside the
//! set fails with `StorageError::LockNotHeld`.
//!
//! ```text
//! begin(locks) ──► reads / staged writes ──► commit()  ──► visible
//!                                        └─► drop      ──► rolled back
//! ```

mod error;
mod lock;
mod memory;
mod snapshot;

pub use error::StorageError;
pub use lock::{LockGuard, LockTable};
pub use memory::{FaultPoint, MemoryStore};
pub use snapshot::StoreSnapshot;

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use fintrack_shared::types::{AccountId, RecurringTemplateId, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{Account, BalanceHistoryEntry, Tombstone, Transaction};
use crate::recurring::RecurringTemplate;
use crate::sync::OfflineTransaction;

/// A lockable row.
///
/// The derived ordering is the global acquisition order: accounts (ascending
/// id), then recurring templates, then sync records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockKey {
    /// An account balance row.
    Account(AccountId),
    /// A recurring template row.
    RecurringTemplate(RecurringTemplateId),
    /// A sync record, keyed by user and client id.
    SyncRecord(UserId, String),
}

/// Ordered set of row locks requested by a unit of work.
pub type LockSet = BTreeSet<LockKey>;

/// A store that can start units of work and serve unlocked reads.
pub trait LedgerStore: Send + Sync {
    /// The unit of work type.
    type Unit<'a>: UnitOfWork
    where
        Self: 'a;

    /// Starts a unit of work holding `locks` until commit or drop.
    fn begin(&self, locks: LockSet) -> Result<Self::Unit<'_>, StorageError>;

    /// Reads an account without locking it.
    fn account(&self, id: AccountId) -> Result<Option<Account>, StorageError>;

    /// Reads a transaction (including soft-deleted ones) without locking.
    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StorageError>;

    /// Active templates whose next occurrence is on or before `on`.
    fn due_recurring(&self, on: NaiveDate) -> Result<Vec<RecurringTemplate>, StorageError>;

    /// Reads a recurring template without locking.
    fn recurring_template(
        &self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StorageError>;

    /// Reads a sync record without locking.
    fn sync_record(
        &self,
        user_id: UserId,
        client_id: &str,
    ) -> Result<Option<OfflineTransaction>, StorageError>;

    /// All sync records of a user.
    fn sync_records(&self, user_id: UserId) -> Result<Vec<OfflineTransaction>, StorageError>;

    /// Tombstones of a user written at or after `since`, oldest first.
    fn tombstones_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Tombstone>, StorageError>;

    /// Balance history of an account, oldest day first.
    fn balance_history(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceHistoryEntry>, StorageError>;
}

/// An atomic, row-locked unit of work.
///
/// Reads see committed state overlaid with this unit's own staged writes.
/// Nothing is visible to other units until `commit`; dropping the unit
/// discards every staged write.
pub trait UnitOfWork {
    /// Locks held by this unit.
    fn locks(&self) -> &LockSet;

    /// Reads an account. Fails with `NotFound` if it does not exist.
    fn account(&self, id: AccountId) -> Result<Account, StorageError>;

    /// Inserts a new account. Requires the account lock.
    fn insert_account(&mut self, account: &Account) -> Result<(), StorageError>;

    /// Adds `delta` to an account's balance and returns the new balance.
    /// Requires the account lock.
    fn adjust_balance(&mut self, id: AccountId, delta: Decimal) -> Result<Decimal, StorageError>;

    /// Reads a transaction, including soft-deleted ones.
    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StorageError>;

    /// Inserts a new transaction.
    fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StorageError>;

    /// Replaces a transaction and returns the previous version.
    fn update_transaction(&mut self, tx: &Transaction) -> Result<Transaction, StorageError>;

    /// Marks a transaction deleted and returns the pre-deletion version.
    fn soft_delete_transaction(
        &mut self,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<Transaction, StorageError>;

    /// Clears a soft deletion and returns the restored transaction.
    fn restore_transaction(&mut self, id: TransactionId) -> Result<Transaction, StorageError>;

    /// Live transactions booked on `account_id` at `date`.
    fn transactions_on(
        &self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Transaction>, StorageError>;

    /// Inserts or overwrites the (account, date) history entry.
    /// Requires the account lock.
    fn upsert_balance_history(&mut self, entry: &BalanceHistoryEntry) -> Result<(), StorageError>;

    /// Reads a recurring template.
    fn recurring_template(
        &self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StorageError>;

    /// Inserts or replaces a recurring template. Requires the template lock.
    fn save_recurring_template(&mut self, template: &RecurringTemplate)
    -> Result<(), StorageError>;

    /// Reads the sync record for (user, client id).
    fn sync_record(
        &self,
        user_id: UserId,
        client_id: &str,
    ) -> Result<Option<OfflineTransaction>, StorageError>;

    /// Inserts or replaces a sync record. Requires the sync record lock.
    fn save_sync_record(&mut self, record: &OfflineTransaction) -> Result<(), StorageError>;

    /// Writes a tombstone for a soft-deleted entity.
    fn record_tombstone(&mut self, tombstone: &Tombstone) -> Result<(), StorageError>;

    /// Removes the tombstone of a restored entity.
    fn clear_tombstone(&mut self, entity_id: uuid::Uuid) -> Result<(), StorageError>;

    /// Publishes every staged write atomically.
    fn commit(self) -> Result<(), StorageError>;
}
