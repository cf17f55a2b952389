//! Ledger service for the transaction lifecycle.
//!
//! Every operation runs in one unit of work holding the row locks of every
//! account it touches, so the cached balances always equal the sum of the
//! live transactions' effects.

use std::sync::Arc;

use fintrack_shared::config::RecurringConfig;
use fintrack_shared::types::{AccountId, TransactionId};
use tracing::info;

use super::error::LedgerError;
use super::history::{BalanceHistoryEntry, BalanceHistoryRecorder, ChangeType};
use super::mutator::LedgerMutator;
use super::types::{
    Account, NewAccount, NewTransaction, Tombstone, TombstoneEntity, Transaction,
    TransactionChanges,
};
use crate::clock::Clock;
use crate::recurring::{
    Recurrence, RecurringTemplate, compute_max_occurrences, compute_next_occurrence,
};
use crate::storage::{LedgerStore, LockKey, LockSet, UnitOfWork};

/// Attempts at locking a transaction whose accounts keep changing.
const LOCK_ATTEMPTS: usize = 3;

/// A created transaction and the template it started, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTransaction {
    /// The stored transaction.
    pub transaction: Transaction,
    /// Template created from a recurring transaction.
    pub template: Option<RecurringTemplate>,
}

/// Ledger service.
pub struct LedgerService<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: RecurringConfig,
}

impl<S: LedgerStore> LedgerService<S> {
    /// Creates a new ledger service.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: RecurringConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Registers an account and records its opening balance as today's
    /// history snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn open_account(&self, input: NewAccount) -> Result<Account, LedgerError> {
        let account = Account {
            id: AccountId::new(),
            user_id: input.user_id,
            name: input.name,
            kind: input.kind,
            balance: input.opening_balance,
            currency: input.currency,
            is_active: true,
        };

        let mut uow = self
            .store
            .begin([LockKey::Account(account.id)].into_iter().collect())?;
        uow.insert_account(&account)?;
        BalanceHistoryRecorder::record(
            &mut uow,
            account.id,
            self.clock.today(),
            account.balance,
            ChangeType::Opening,
            account.balance,
        )?;
        uow.commit()?;

        info!(
            user_id = %account.user_id,
            account_id = %account.id,
            kind = %account.kind,
            "Account opened"
        );
        Ok(account)
    }

    /// Creates a transaction and applies it to the balances.
    ///
    /// When `input.recurrence` is set, the recurring template is created in
    /// the same unit of work. Its `next_occurrence` is one step after the
    /// transaction date and `max_occurrences` is derived from the end date.
    ///
    /// # Errors
    ///
    /// Validation errors, `AccountNotFound`, `AccountNotOwned` when an
    /// account belongs to another user, `InvalidRecurrence`, or a store
    /// failure. Nothing is written on error.
    pub fn create_transaction(
        &self,
        input: NewTransaction,
    ) -> Result<CreatedTransaction, LedgerError> {
        let transaction = Transaction {
            id: TransactionId::new(),
            user_id: input.user_id,
            account_id: input.account_id,
            transfer_account_id: input.transfer_account_id,
            category_id: input.category_id,
            amount: input.amount,
            kind: input.kind,
            date: input.date,
            description: input.description,
            notes: input.notes,
            reference_number: input.reference_number,
            recurrence: input.recurrence,
            is_cleared: input.is_cleared,
            recurring_template_id: None,
            client_id: None,
            created_at: self.clock.now(),
            deleted_at: None,
        };
        let effect = transaction.effect();
        LedgerMutator::validate(&effect)?;

        let template = transaction
            .recurrence
            .as_ref()
            .map(|recurrence| self.template_for(&transaction, recurrence))
            .transpose()?;

        let mut locks = effect.lock_set();
        if let Some(template) = &template {
            locks.insert(LockKey::RecurringTemplate(template.id));
        }

        let mut uow = self.store.begin(locks)?;
        LedgerMutator::check_ownership(&uow, &effect, transaction.user_id)?;
        uow.insert_transaction(&transaction)?;
        LedgerMutator::apply(&mut uow, &effect)?;
        if let Some(template) = &template {
            uow.save_recurring_template(template)?;
        }
        uow.commit()?;

        info!(
            user_id = %transaction.user_id,
            transaction_id = %transaction.id,
            account_id = %transaction.account_id,
            kind = %transaction.kind,
            amount = %transaction.amount,
            "Transaction created"
        );
        if let Some(template) = &template {
            info!(
                template_id = %template.id,
                transaction_id = %transaction.id,
                next_occurrence = %template.next_occurrence,
                is_active = template.is_active,
                "Recurring template created"
            );
        }
        Ok(CreatedTransaction {
            transaction,
            template,
        })
    }

    /// Applies `changes` to a live transaction, reverting its old effect and
    /// applying the new one.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound`, `AlreadyDeleted`, validation errors on the
    /// updated transaction, `AccountNotFound`, `AccountNotOwned`, or a store
    /// failure.
    pub fn update_transaction(
        &self,
        id: TransactionId,
        changes: &TransactionChanges,
    ) -> Result<Transaction, LedgerError> {
        let (mut uow, current) = self.lock_transaction(id, |tx| {
            let mut locks = tx.effect().lock_set();
            locks.extend(changes.apply_to(tx).effect().lock_set());
            locks
        })?;
        if current.is_deleted() {
            return Err(LedgerError::AlreadyDeleted(id));
        }

        let updated = changes.apply_to(&current);
        LedgerMutator::check_ownership(&uow, &updated.effect(), current.user_id)?;
        LedgerMutator::replace(&mut uow, &current.effect(), &updated.effect())?;
        uow.update_transaction(&updated)?;
        uow.commit()?;

        info!(
            user_id = %updated.user_id,
            transaction_id = %id,
            amount = %updated.amount,
            "Transaction updated"
        );
        Ok(updated)
    }

    /// Soft-deletes a transaction, reverts its effect and leaves a tombstone
    /// for offline clients.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound`, `AlreadyDeleted`, or a store failure.
    pub fn delete_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let (mut uow, current) = self.lock_transaction(id, |tx| tx.effect().lock_set())?;
        if current.is_deleted() {
            return Err(LedgerError::AlreadyDeleted(id));
        }

        let now = self.clock.now();
        let previous = uow.soft_delete_transaction(id, now)?;
        LedgerMutator::revert(&mut uow, &previous.effect())?;
        uow.record_tombstone(&Tombstone {
            entity: TombstoneEntity::Transaction,
            entity_id: id.into_inner(),
            user_id: previous.user_id,
            deleted_at: now,
        })?;
        uow.commit()?;

        info!(user_id = %previous.user_id, transaction_id = %id, "Transaction deleted");
        Ok(Transaction {
            deleted_at: Some(now),
            ..previous
        })
    }

    /// Restores a soft-deleted transaction and re-applies its effect.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound`, `NotDeleted`, `AccountNotFound`, or a store
    /// failure.
    pub fn restore_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let (mut uow, current) = self.lock_transaction(id, |tx| tx.effect().lock_set())?;
        if !current.is_deleted() {
            return Err(LedgerError::NotDeleted(id));
        }

        let restored = uow.restore_transaction(id)?;
        LedgerMutator::apply(&mut uow, &restored.effect())?;
        uow.clear_tombstone(id.into_inner())?;
        uow.commit()?;

        info!(user_id = %restored.user_id, transaction_id = %id, "Transaction restored");
        Ok(restored)
    }

    /// Reads an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.account(id)?)
    }

    /// Reads a transaction, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.transaction(id)?)
    }

    /// Balance history of an account, oldest day first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn balance_history(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        Ok(self.store.balance_history(account_id)?)
    }

    fn template_for(
        &self,
        transaction: &Transaction,
        recurrence: &Recurrence,
    ) -> Result<RecurringTemplate, LedgerError> {
        if recurrence.interval == 0 {
            return Err(LedgerError::InvalidRecurrence(
                "interval must be at least 1".to_string(),
            ));
        }
        let next = compute_next_occurrence(
            transaction.date,
            recurrence.frequency,
            recurrence.interval,
        )
        .ok_or_else(|| {
            LedgerError::InvalidRecurrence("next occurrence is out of range".to_string())
        })?;
        let max_occurrences = recurrence.end_date.map(|end| {
            compute_max_occurrences(
                transaction.date,
                end,
                recurrence.frequency,
                recurrence.interval,
                self.config.max_occurrence_steps,
            )
        });

        let mut template =
            RecurringTemplate::from_first_instance(transaction, recurrence, next, max_occurrences);
        template.is_active = !template.is_exhausted() && !template.is_past_end(next);
        Ok(template)
    }

    /// Locks `locks_for(tx)` and re-reads the transaction under the lock,
    /// retrying if the re-read needs locks that were not taken.
    fn lock_transaction<F>(
        &self,
        id: TransactionId,
        locks_for: F,
    ) -> Result<(S::Unit<'_>, Transaction), LedgerError>
    where
        F: Fn(&Transaction) -> LockSet,
    {
        for _ in 0..LOCK_ATTEMPTS {
            let listed = self
                .store
                .transaction(id)?
                .ok_or(LedgerError::TransactionNotFound(id))?;
            let uow = self.store.begin(locks_for(&listed))?;
            let current = uow
                .transaction(id)?
                .ok_or(LedgerError::TransactionNotFound(id))?;
            if locks_for(&current).is_subset(uow.locks()) {
                return Ok((uow, current));
            }
        }
        Err(LedgerError::ConcurrentModification(id))
    }
}
