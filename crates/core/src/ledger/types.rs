//! Ledger domain types: accounts, transactions, and balance effects.

use chrono::{DateTime, NaiveDate, Utc};
use fintrack_shared::types::{
    AccountId, CategoryId, RecurringTemplateId, TransactionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::balance::BalanceRule;
use crate::recurring::Recurrence;
use crate::storage::{LockKey, LockSet};

/// Kind of money account.
///
/// Only `CreditCard` uses the liability sign convention: its balance is the
/// amount owed, so spending increases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Checking / current account.
    Checking,
    /// Savings account.
    Savings,
    /// Cash wallet.
    Cash,
    /// Credit card (balance is debt).
    CreditCard,
    /// Brokerage or investment account.
    Investment,
    /// Anything else.
    Other,
}

impl AccountKind {
    /// Returns the string representation of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::Cash => "cash",
            Self::CreditCard => "credit_card",
            Self::Investment => "investment",
            Self::Other => "other",
        }
    }

    /// Parses a kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "checking" => Some(Self::Checking),
            "savings" => Some(Self::Savings),
            "cash" => Some(Self::Cash),
            "credit_card" => Some(Self::CreditCard),
            "investment" => Some(Self::Investment),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Sign convention applied to this kind of account.
    #[must_use]
    pub fn balance_rule(self) -> BalanceRule {
        match self {
            Self::CreditCard => BalanceRule::Liability,
            _ => BalanceRule::Asset,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A money account with its cached balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account ID.
    pub id: AccountId,
    /// Owner.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Account kind.
    pub kind: AccountKind,
    /// Cached balance. Only `LedgerMutator` changes it.
    pub balance: Decimal,
    /// Currency code (informational).
    pub currency: String,
    /// Whether the account is active.
    pub is_active: bool,
}

/// Input for opening a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Owner.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Account kind.
    pub kind: AccountKind,
    /// Balance the account starts with.
    pub opening_balance: Decimal,
    /// Currency code.
    pub currency: String,
}

/// Transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Money coming in.
    Income,
    /// Money going out.
    Expense,
    /// Money moving between two accounts.
    Transfer,
}

impl TransactionType {
    /// Returns the string representation of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
        }
    }

    /// Parses a type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger transaction.
///
/// `amount` is never negative; the sign of its effect comes from `kind` and
/// the kinds of the accounts involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction ID.
    pub id: TransactionId,
    /// Owner.
    pub user_id: UserId,
    /// Primary account.
    pub account_id: AccountId,
    /// Destination account, set iff `kind` is `Transfer`.
    pub transfer_account_id: Option<AccountId>,
    /// Category.
    pub category_id: Option<CategoryId>,
    /// Non-negative amount.
    pub amount: Decimal,
    /// Transaction type.
    pub kind: TransactionType,
    /// Booking date.
    pub date: NaiveDate,
    /// Free-text description.
    pub description: String,
    /// Notes.
    pub notes: Option<String>,
    /// External reference (cheque number, invoice, ...).
    pub reference_number: Option<String>,
    /// Recurrence descriptor; present iff the transaction is recurring.
    pub recurrence: Option<Recurrence>,
    /// Whether the transaction has cleared the bank.
    pub is_cleared: bool,
    /// Template this occurrence was materialized from.
    pub recurring_template_id: Option<RecurringTemplateId>,
    /// Offline client id when the transaction arrived through sync.
    pub client_id: Option<String>,
    /// Server creation time.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion time.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Snapshot of the balance-relevant fields.
    #[must_use]
    pub fn effect(&self) -> LedgerEffect {
        LedgerEffect {
            account_id: self.account_id,
            transfer_account_id: self.transfer_account_id,
            amount: self.amount,
            kind: self.kind,
            date: self.date,
        }
    }

    /// Returns true if the transaction was soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if the transaction carries a recurrence descriptor.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// The balance-relevant fields of a transaction.
///
/// Reverting an update needs the values from *before* the update, so callers
/// capture this snapshot first and hand it to `LedgerMutator::revert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEffect {
    /// Primary account.
    pub account_id: AccountId,
    /// Destination account for transfers.
    pub transfer_account_id: Option<AccountId>,
    /// Non-negative amount.
    pub amount: Decimal,
    /// Transaction type.
    pub kind: TransactionType,
    /// Date the effect is recorded against in balance history.
    pub date: NaiveDate,
}

impl LedgerEffect {
    /// Accounts touched by this effect.
    pub fn accounts(&self) -> impl Iterator<Item = AccountId> {
        std::iter::once(self.account_id).chain(self.transfer_account_id)
    }

    /// Row locks needed to apply or revert this effect.
    #[must_use]
    pub fn lock_set(&self) -> LockSet {
        self.accounts().map(LockKey::Account).collect()
    }
}

/// Input for creating a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Owner.
    pub user_id: UserId,
    /// Primary account.
    pub account_id: AccountId,
    /// Destination account for transfers.
    pub transfer_account_id: Option<AccountId>,
    /// Category.
    pub category_id: Option<CategoryId>,
    /// Non-negative amount.
    pub amount: Decimal,
    /// Transaction type.
    pub kind: TransactionType,
    /// Booking date.
    pub date: NaiveDate,
    /// Description.
    pub description: String,
    /// Notes.
    pub notes: Option<String>,
    /// External reference.
    pub reference_number: Option<String>,
    /// Recurrence descriptor.
    pub recurrence: Option<Recurrence>,
    /// Whether the transaction has cleared.
    pub is_cleared: bool,
}

/// Partial update of a transaction. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TransactionChanges {
    /// New primary account.
    pub account_id: Option<AccountId>,
    /// New destination account (`Some(None)` clears it).
    pub transfer_account_id: Option<Option<AccountId>>,
    /// New category (`Some(None)` clears it).
    pub category_id: Option<Option<CategoryId>>,
    /// New amount.
    pub amount: Option<Decimal>,
    /// New type.
    pub kind: Option<TransactionType>,
    /// New date.
    pub date: Option<NaiveDate>,
    /// New description.
    pub description: Option<String>,
    /// New notes (`Some(None)` clears them).
    pub notes: Option<Option<String>>,
    /// New clearance flag.
    pub is_cleared: Option<bool>,
}

impl TransactionChanges {
    /// Applies the changes to a copy of `tx`.
    #[must_use]
    pub fn apply_to(&self, tx: &Transaction) -> Transaction {
        let mut updated = tx.clone();
        if let Some(account_id) = self.account_id {
            updated.account_id = account_id;
        }
        if let Some(transfer_account_id) = self.transfer_account_id {
            updated.transfer_account_id = transfer_account_id;
        }
        if let Some(category_id) = self.category_id {
            updated.category_id = category_id;
        }
        if let Some(amount) = self.amount {
            updated.amount = amount;
        }
        if let Some(kind) = self.kind {
            updated.kind = kind;
        }
        if let Some(date) = self.date {
            updated.date = date;
        }
        if let Some(description) = &self.description {
            updated.description.clone_from(description);
        }
        if let Some(notes) = &self.notes {
            updated.notes.clone_from(notes);
        }
        if let Some(is_cleared) = self.is_cleared {
            updated.is_cleared = is_cleared;
        }
        updated
    }
}

/// Entity kinds that leave tombstones when soft-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TombstoneEntity {
    /// A ledger transaction.
    Transaction,
}

/// Record of a soft deletion, served to offline clients catching up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Kind of deleted entity.
    pub entity: TombstoneEntity,
    /// Deleted entity ID.
    pub entity_id: Uuid,
    /// Owner.
    pub user_id: UserId,
    /// Deletion time.
    pub deleted_at: DateTime<Utc>,
}
