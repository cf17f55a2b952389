//! In-memory `LedgerStore`.
//!
//! Committed state lives behind one mutex that is only held for short reads
//! and for publishing a unit's staged writes. Row serialization comes from the
//! `LockTable`, not from that mutex, so units on disjoint accounts run
//! concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use fintrack_shared::config::StoreConfig;
use fintrack_shared::types::{AccountId, RecurringTemplateId, TransactionId, UserId};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::snapshot::StoreSnapshot;
use super::{LedgerStore, LockGuard, LockKey, LockSet, LockTable, StorageError, UnitOfWork};
use crate::ledger::{Account, BalanceHistoryEntry, Tombstone, Transaction};
use crate::recurring::RecurringTemplate;
use crate::sync::OfflineTransaction;

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// The next transaction insert fails.
    InsertTransaction,
    /// The next balance adjustment fails.
    AdjustBalance,
    /// The next commit fails after all writes were staged.
    Commit,
}

#[derive(Debug, Default, Clone)]
struct State {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    history: BTreeMap<(AccountId, NaiveDate), BalanceHistoryEntry>,
    templates: HashMap<RecurringTemplateId, RecurringTemplate>,
    sync_records: HashMap<(UserId, String), OfflineTransaction>,
    tombstones: HashMap<Uuid, Tombstone>,
}

/// In-memory store used by tests and the worker binary.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    locks: LockTable,
    fault: Mutex<Option<FaultPoint>>,
}

impl MemoryStore {
    /// Creates an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&StoreConfig::default())
    }

    /// Creates an empty store configured from `config`.
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
    }

    /// Creates an empty store whose units wait at most `timeout` for locks.
    #[must_use]
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            locks: LockTable::new(timeout),
            fault: Mutex::new(None),
        }
    }

    /// Rebuilds a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot, config: &StoreConfig) -> Self {
        let store = Self::from_config(config);
        {
            let mut state = store
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.accounts = snapshot.accounts.into_iter().map(|a| (a.id, a)).collect();
            state.transactions = snapshot
                .transactions
                .into_iter()
                .map(|t| (t.id, t))
                .collect();
            state.history = snapshot
                .balance_history
                .into_iter()
                .map(|e| ((e.account_id, e.date), e))
                .collect();
            state.templates = snapshot
                .recurring_templates
                .into_iter()
                .map(|t| (t.id, t))
                .collect();
            state.sync_records = snapshot
                .sync_records
                .into_iter()
                .map(|r| ((r.user_id, r.client_id.clone()), r))
                .collect();
            state.tombstones = snapshot
                .tombstones
                .into_iter()
                .map(|t| (t.entity_id, t))
                .collect();
        }
        store
    }

    /// Exports committed state, sorted for stable output.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StorageError> {
        let state = self.state()?;

        let mut accounts: Vec<_> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        let mut transactions: Vec<_> = state.transactions.values().cloned().collect();
        transactions.sort_by_key(|t| (t.date, t.id));
        let balance_history = state.history.values().cloned().collect();
        let mut recurring_templates: Vec<_> = state.templates.values().cloned().collect();
        recurring_templates.sort_by_key(|t| t.id);
        let mut sync_records: Vec<_> = state.sync_records.values().cloned().collect();
        sync_records.sort_by(|a, b| (a.user_id, &a.client_id).cmp(&(b.user_id, &b.client_id)));
        let mut tombstones: Vec<_> = state.tombstones.values().cloned().collect();
        tombstones.sort_by_key(|t| (t.deleted_at, t.entity_id));

        Ok(StoreSnapshot {
            accounts,
            transactions,
            balance_history,
            recurring_templates,
            sync_records,
            tombstones,
        })
    }

    /// Arms a one-shot fault that fires at `point` in the next unit that
    /// reaches it.
    pub fn inject_fault(&self, point: FaultPoint) {
        *self
            .fault
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(point);
    }

    fn trip(&self, point: FaultPoint) -> Result<(), StorageError> {
        let mut fault = self.fault.lock()?;
        if *fault == Some(point) {
            *fault = None;
            return Err(StorageError::unavailable(format!(
                "injected fault at {point:?}"
            )));
        }
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        Ok(self.state.lock()?)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    type Unit<'a> = MemoryUnit<'a>;

    fn begin(&self, locks: LockSet) -> Result<MemoryUnit<'_>, StorageError> {
        let guard = self.locks.acquire(&locks)?;
        Ok(MemoryUnit {
            store: self,
            guard,
            staged: Staged::default(),
        })
    }

    fn account(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(self.state()?.accounts.get(&id).cloned())
    }

    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        Ok(self.state()?.transactions.get(&id).cloned())
    }

    fn due_recurring(&self, on: NaiveDate) -> Result<Vec<RecurringTemplate>, StorageError> {
        let state = self.state()?;
        let mut due: Vec<_> = state
            .templates
            .values()
            .filter(|t| t.is_active && t.next_occurrence <= on)
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_occurrence, t.id));
        Ok(due)
    }

    fn recurring_template(
        &self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StorageError> {
        Ok(self.state()?.templates.get(&id).cloned())
    }

    fn sync_record(
        &self,
        user_id: UserId,
        client_id: &str,
    ) -> Result<Option<OfflineTransaction>, StorageError> {
        Ok(self
            .state()?
            .sync_records
            .get(&(user_id, client_id.to_string()))
            .cloned())
    }

    fn sync_records(&self, user_id: UserId) -> Result<Vec<OfflineTransaction>, StorageError> {
        let state = self.state()?;
        let mut records: Vec<_> = state
            .sync_records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    fn tombstones_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Tombstone>, StorageError> {
        let state = self.state()?;
        let mut tombstones: Vec<_> = state
            .tombstones
            .values()
            .filter(|t| t.user_id == user_id && t.deleted_at >= since)
            .cloned()
            .collect();
        tombstones.sort_by_key(|t| (t.deleted_at, t.entity_id));
        Ok(tombstones)
    }

    fn balance_history(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceHistoryEntry>, StorageError> {
        let state = self.state()?;
        Ok(state
            .history
            .range((account_id, NaiveDate::MIN)..=(account_id, NaiveDate::MAX))
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<AccountId, Account>,
    balance_deltas: HashMap<AccountId, Decimal>,
    transactions: HashMap<TransactionId, Transaction>,
    history: HashMap<(AccountId, NaiveDate), BalanceHistoryEntry>,
    templates: HashMap<RecurringTemplateId, RecurringTemplate>,
    sync_records: HashMap<(UserId, String), OfflineTransaction>,
    // `None` marks a tombstone cleared by a restore.
    tombstones: HashMap<Uuid, Option<Tombstone>>,
}

/// Unit of work over a `MemoryStore`.
#[derive(Debug)]
pub struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    guard: LockGuard<'a>,
    staged: Staged,
}

impl MemoryUnit<'_> {
    fn require(&self, key: LockKey) -> Result<(), StorageError> {
        if self.guard.keys().contains(&key) {
            Ok(())
        } else {
            Err(StorageError::LockNotHeld(key))
        }
    }

    fn require_accounts(&self, tx: &Transaction) -> Result<(), StorageError> {
        for account_id in tx.effect().accounts() {
            self.require(LockKey::Account(account_id))?;
        }
        Ok(())
    }

    fn existing_transaction(&self, id: TransactionId) -> Result<Transaction, StorageError> {
        self.transaction(id)?
            .ok_or_else(|| StorageError::not_found("transaction", id))
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn locks(&self) -> &LockSet {
        self.guard.keys()
    }

    fn account(&self, id: AccountId) -> Result<Account, StorageError> {
        let mut account = match self.staged.accounts.get(&id) {
            Some(account) => account.clone(),
            None => self
                .store
                .state()?
                .accounts
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("account", id))?,
        };
        if let Some(delta) = self.staged.balance_deltas.get(&id) {
            account.balance += *delta;
        }
        Ok(account)
    }

    fn insert_account(&mut self, account: &Account) -> Result<(), StorageError> {
        self.require(LockKey::Account(account.id))?;
        if self.store.state()?.accounts.contains_key(&account.id)
            || self.staged.accounts.contains_key(&account.id)
        {
            return Err(StorageError::already_exists("account", account.id));
        }
        self.staged.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn adjust_balance(&mut self, id: AccountId, delta: Decimal) -> Result<Decimal, StorageError> {
        self.require(LockKey::Account(id))?;
        self.store.trip(FaultPoint::AdjustBalance)?;
        let current = self.account(id)?.balance;
        *self.staged.balance_deltas.entry(id).or_default() += delta;
        Ok(current + delta)
    }

    fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        if let Some(tx) = self.staged.transactions.get(&id) {
            return Ok(Some(tx.clone()));
        }
        Ok(self.store.state()?.transactions.get(&id).cloned())
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StorageError> {
        self.require_accounts(tx)?;
        self.store.trip(FaultPoint::InsertTransaction)?;
        if self.transaction(tx.id)?.is_some() {
            return Err(StorageError::already_exists("transaction", tx.id));
        }
        self.staged.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    fn update_transaction(&mut self, tx: &Transaction) -> Result<Transaction, StorageError> {
        self.require_accounts(tx)?;
        let previous = self.existing_transaction(tx.id)?;
        self.staged.transactions.insert(tx.id, tx.clone());
        Ok(previous)
    }

    fn soft_delete_transaction(
        &mut self,
        id: TransactionId,
        at: DateTime<Utc>,
    ) -> Result<Transaction, StorageError> {
        let previous = self.existing_transaction(id)?;
        self.require_accounts(&previous)?;
        let mut deleted = previous.clone();
        deleted.deleted_at = Some(at);
        self.staged.transactions.insert(id, deleted);
        Ok(previous)
    }

    fn restore_transaction(&mut self, id: TransactionId) -> Result<Transaction, StorageError> {
        let mut restored = self.existing_transaction(id)?;
        self.require_accounts(&restored)?;
        restored.deleted_at = None;
        self.staged.transactions.insert(id, restored.clone());
        Ok(restored)
    }

    fn transactions_on(
        &self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Transaction>, StorageError> {
        let matches = |tx: &Transaction| {
            tx.account_id == account_id && tx.date == date && !tx.is_deleted()
        };

        let state = self.store.state()?;
        let mut found: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| !self.staged.transactions.contains_key(&tx.id))
            .filter(|tx| matches(*tx))
            .cloned()
            .collect();
        drop(state);
        found.extend(
            self.staged
                .transactions
                .values()
                .filter(|tx| matches(*tx))
                .cloned(),
        );
        found.sort_by_key(|tx| (tx.created_at, tx.id));
        Ok(found)
    }

    fn upsert_balance_history(&mut self, entry: &BalanceHistoryEntry) -> Result<(), StorageError> {
        self.require(LockKey::Account(entry.account_id))?;
        self.staged
            .history
            .insert((entry.account_id, entry.date), entry.clone());
        Ok(())
    }

    fn recurring_template(
        &self,
        id: RecurringTemplateId,
    ) -> Result<Option<RecurringTemplate>, StorageError> {
        if let Some(template) = self.staged.templates.get(&id) {
            return Ok(Some(template.clone()));
        }
        Ok(self.store.state()?.templates.get(&id).cloned())
    }

    fn save_recurring_template(
        &mut self,
        template: &RecurringTemplate,
    ) -> Result<(), StorageError> {
        self.require(LockKey::RecurringTemplate(template.id))?;
        self.staged.templates.insert(template.id, template.clone());
        Ok(())
    }

    fn sync_record(
        &self,
        user_id: UserId,
        client_id: &str,
    ) -> Result<Option<OfflineTransaction>, StorageError> {
        let key = (user_id, client_id.to_string());
        if let Some(record) = self.staged.sync_records.get(&key) {
            return Ok(Some(record.clone()));
        }
        Ok(self.store.state()?.sync_records.get(&key).cloned())
    }

    fn save_sync_record(&mut self, record: &OfflineTransaction) -> Result<(), StorageError> {
        self.require(LockKey::SyncRecord(record.user_id, record.client_id.clone()))?;
        self.staged
            .sync_records
            .insert((record.user_id, record.client_id.clone()), record.clone());
        Ok(())
    }

    fn record_tombstone(&mut self, tombstone: &Tombstone) -> Result<(), StorageError> {
        self.staged
            .tombstones
            .insert(tombstone.entity_id, Some(tombstone.clone()));
        Ok(())
    }

    fn clear_tombstone(&mut self, entity_id: Uuid) -> Result<(), StorageError> {
        self.staged.tombstones.insert(entity_id, None);
        Ok(())
    }

    fn commit(self) -> Result<(), StorageError> {
        self.store.trip(FaultPoint::Commit)?;
        let staged = self.staged;
        let mut state = self.store.state()?;

        if let Some(missing) = staged.balance_deltas.keys().find(|id| {
            !state.accounts.contains_key(*id) && !staged.accounts.contains_key(*id)
        }) {
            return Err(StorageError::not_found("account", missing));
        }

        state.accounts.extend(staged.accounts);
        for (id, delta) in staged.balance_deltas {
            if let Some(account) = state.accounts.get_mut(&id) {
                account.balance += delta;
            }
        }
        state.transactions.extend(staged.transactions);
        state.history.extend(staged.history);
        state.templates.extend(staged.templates);
        state.sync_records.extend(staged.sync_records);
        for (entity_id, tombstone) in staged.tombstones {
            match tombstone {
                Some(tombstone) => {
                    state.tombstones.insert(entity_id, tombstone);
                }
                None => {
                    state.tombstones.remove(&entity_id);
                }
            }
        }
        Ok(())
    }
}
