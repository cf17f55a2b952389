//! Recurring engine errors.

use fintrack_shared::AppError;
use fintrack_shared::types::RecurringTemplateId;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::storage::StorageError;

/// Errors raised while materializing recurring templates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurringError {
    /// Template not found.
    #[error("Recurring template not found: {0}")]
    TemplateNotFound(RecurringTemplateId),

    /// Applying the occurrence failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<RecurringError> for AppError {
    fn from(err: RecurringError) -> Self {
        match err {
            RecurringError::TemplateNotFound(_) => Self::NotFound(err.to_string()),
            RecurringError::Ledger(e) => e.into(),
            RecurringError::Storage(e) => e.into(),
        }
    }
}
