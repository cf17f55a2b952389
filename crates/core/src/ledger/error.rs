//! Ledger error types for validation and state errors.
//!
//! This module defines all errors that can occur while applying balance
//! effects or moving a transaction through its lifecycle.

use fintrack_shared::AppError;
use fintrack_shared::types::{AccountId, TransactionId, UserId};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Transaction amount cannot be negative.
    #[error("Transaction amount cannot be negative: {0}")]
    NegativeAmount(Decimal),

    /// A transfer needs a destination account.
    #[error("Transfer requires a destination account")]
    TransferWithoutDestination,

    /// Only transfers may name a destination account.
    #[error("Only transfers may have a destination account")]
    DestinationOnNonTransfer,

    /// A transfer cannot move money to the account it comes from.
    #[error("Transfer source and destination are the same account: {0}")]
    SameAccountTransfer(AccountId),

    /// Recurrence descriptor is unusable.
    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    // ========== Account Errors ==========
    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// The account belongs to another user.
    #[error("Account {account_id} does not belong to user {user_id}")]
    AccountNotOwned {
        /// The account ID.
        account_id: AccountId,
        /// The user that tried to book against it.
        user_id: UserId,
    },

    // ========== Transaction State Errors ==========
    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The transaction is soft-deleted and cannot be changed.
    #[error("Transaction {0} is deleted")]
    AlreadyDeleted(TransactionId),

    /// Restore was requested for a live transaction.
    #[error("Transaction {0} is not deleted")]
    NotDeleted(TransactionId),

    /// The transaction moved to other accounts while its locks were taken.
    #[error("Transaction {0} changed concurrently, please retry")]
    ConcurrentModification(TransactionId),

    // ========== Storage Errors ==========
    /// The store rejected or failed the unit of work.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Returns the error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            Self::TransferWithoutDestination => "TRANSFER_WITHOUT_DESTINATION",
            Self::DestinationOnNonTransfer => "DESTINATION_ON_NON_TRANSFER",
            Self::SameAccountTransfer(_) => "SAME_ACCOUNT_TRANSFER",
            Self::InvalidRecurrence(_) => "INVALID_RECURRENCE",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::AccountNotOwned { .. } => "ACCOUNT_NOT_OWNED",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::AlreadyDeleted(_) => "TRANSACTION_DELETED",
            Self::NotDeleted(_) => "TRANSACTION_NOT_DELETED",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::ConcurrentModification(_) => true,
            _ => false,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Storage(e) => e.into(),
            LedgerError::AccountNotFound(_)
            | LedgerError::AccountNotOwned { .. }
            | LedgerError::TransactionNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            LedgerError::AlreadyDeleted(_) | LedgerError::NotDeleted(_) => {
                Self::BusinessRule(err.to_string())
            }
            LedgerError::ConcurrentModification(_) => Self::Conflict(err.to_string()),
            LedgerError::NegativeAmount(_)
            | LedgerError::TransferWithoutDestination
            | LedgerError::DestinationOnNonTransfer
            | LedgerError::SameAccountTransfer(_)
            | LedgerError::InvalidRecurrence(_) => Self::Validation(err.to_string()),
        }
    }
}
