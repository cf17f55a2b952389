//! Applies and reverts the balance effect of one transaction.
//!
//! `LedgerMutator` is the only code that moves an account's cached balance.
//! Every call runs inside a caller-owned unit of work, so a failure anywhere
//! in the caller's operation rolls the balance change back with it.

use fintrack_shared::types::{AccountId, UserId};
use rust_decimal::Decimal;
use tracing::debug;

use super::balance::{BalanceChange, BalanceRule};
use super::error::LedgerError;
use super::history::{BalanceHistoryRecorder, ChangeType};
use super::types::{Account, LedgerEffect, TransactionType};
use crate::storage::{StorageError, UnitOfWork};

/// One signed movement on one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// The account ID.
    pub account_id: AccountId,
    /// Signed balance delta.
    pub delta: Decimal,
    /// History classification of the movement.
    pub change_type: ChangeType,
}

/// Stateless balance mutator.
pub struct LedgerMutator;

impl LedgerMutator {
    /// Checks the shape of an effect without touching storage.
    ///
    /// # Errors
    ///
    /// Negative amount, transfer without (or to the same) destination, or a
    /// destination on a non-transfer.
    pub fn validate(effect: &LedgerEffect) -> Result<(), LedgerError> {
        if effect.amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(effect.amount));
        }
        match (effect.kind, effect.transfer_account_id) {
            (TransactionType::Transfer, None) => Err(LedgerError::TransferWithoutDestination),
            (TransactionType::Transfer, Some(to)) if to == effect.account_id => {
                Err(LedgerError::SameAccountTransfer(to))
            }
            (TransactionType::Income | TransactionType::Expense, Some(_)) => {
                Err(LedgerError::DestinationOnNonTransfer)
            }
            _ => Ok(()),
        }
    }

    /// Checks that every account of `effect` exists and belongs to
    /// `user_id`.
    ///
    /// # Errors
    ///
    /// `AccountNotFound`, `AccountNotOwned`, or a storage error.
    pub fn check_ownership<U: UnitOfWork>(
        uow: &U,
        effect: &LedgerEffect,
        user_id: UserId,
    ) -> Result<(), LedgerError> {
        for account_id in effect.accounts() {
            let account = Self::account(uow, account_id)?;
            if account.user_id != user_id {
                return Err(LedgerError::AccountNotOwned {
                    account_id,
                    user_id,
                });
            }
        }
        Ok(())
    }

    /// Signed postings of `effect` given the rules of the accounts involved.
    ///
    /// `destination` is ignored unless the effect is a transfer.
    #[must_use]
    pub fn postings(
        effect: &LedgerEffect,
        primary: BalanceRule,
        destination: Option<BalanceRule>,
    ) -> Vec<Posting> {
        let primary_change = match effect.kind {
            TransactionType::Income => ChangeType::Income,
            TransactionType::Expense => ChangeType::Expense,
            TransactionType::Transfer => ChangeType::TransferOut,
        };
        let mut postings = vec![Posting {
            account_id: effect.account_id,
            delta: primary.primary_delta(effect.kind, effect.amount),
            change_type: primary_change,
        }];

        if effect.kind == TransactionType::Transfer {
            if let (Some(account_id), Some(rule)) = (effect.transfer_account_id, destination) {
                postings.push(Posting {
                    account_id,
                    delta: rule.inflow(effect.amount),
                    change_type: ChangeType::TransferIn,
                });
            }
        }
        postings
    }

    /// Applies `effect` to the balances it touches.
    ///
    /// # Errors
    ///
    /// Validation errors, `AccountNotFound` if any account does not resolve
    /// (checked before any balance moves), or a storage error.
    pub fn apply<U: UnitOfWork>(
        uow: &mut U,
        effect: &LedgerEffect,
    ) -> Result<Vec<BalanceChange>, LedgerError> {
        let postings = Self::resolve(uow, effect)?;
        Self::post(uow, effect, &postings, false)
    }

    /// Reverts `effect`, the snapshot of a transaction as it was applied.
    ///
    /// # Errors
    ///
    /// Same as [`LedgerMutator::apply`].
    pub fn revert<U: UnitOfWork>(
        uow: &mut U,
        effect: &LedgerEffect,
    ) -> Result<Vec<BalanceChange>, LedgerError> {
        let postings = Self::resolve(uow, effect)?;
        Self::post(uow, effect, &postings, true)
    }

    /// Reverts `old` and applies `new` in the same unit of work.
    ///
    /// Every account of both effects is resolved first, so a missing account
    /// on the new side fails before the old effect is reverted.
    ///
    /// # Errors
    ///
    /// Same as [`LedgerMutator::apply`].
    pub fn replace<U: UnitOfWork>(
        uow: &mut U,
        old: &LedgerEffect,
        new: &LedgerEffect,
    ) -> Result<Vec<BalanceChange>, LedgerError> {
        let reverse = Self::resolve(uow, old)?;
        let forward = Self::resolve(uow, new)?;
        let mut changes = Self::post(uow, old, &reverse, true)?;
        changes.extend(Self::post(uow, new, &forward, false)?);
        Ok(changes)
    }

    fn resolve<U: UnitOfWork>(
        uow: &U,
        effect: &LedgerEffect,
    ) -> Result<Vec<Posting>, LedgerError> {
        Self::validate(effect)?;
        let primary = Self::account(uow, effect.account_id)?;
        let destination = effect
            .transfer_account_id
            .map(|id| Self::account(uow, id))
            .transpose()?;
        Ok(Self::postings(
            effect,
            primary.kind.balance_rule(),
            destination.map(|a| a.kind.balance_rule()),
        ))
    }

    fn post<U: UnitOfWork>(
        uow: &mut U,
        effect: &LedgerEffect,
        postings: &[Posting],
        reverse: bool,
    ) -> Result<Vec<BalanceChange>, LedgerError> {
        let mut changes = Vec::with_capacity(postings.len());
        for posting in postings {
            let (delta, change_type) = if reverse {
                (-posting.delta, ChangeType::Reversal)
            } else {
                (posting.delta, posting.change_type)
            };
            let balance = uow.adjust_balance(posting.account_id, delta)?;
            BalanceHistoryRecorder::record(
                uow,
                posting.account_id,
                effect.date,
                balance,
                change_type,
                delta,
            )?;
            debug!(
                account_id = %posting.account_id,
                delta = %delta,
                balance = %balance,
                ?change_type,
                "Balance adjusted"
            );
            changes.push(BalanceChange::new(posting.account_id, balance - delta, delta));
        }
        Ok(changes)
    }

    fn account<U: UnitOfWork>(uow: &U, id: AccountId) -> Result<Account, LedgerError> {
        uow.account(id).map_err(|e| match e {
            StorageError::NotFound { .. } => LedgerError::AccountNotFound(id),
            other => LedgerError::Storage(other),
        })
    }
}
