//! Sync error types.
//!
//! Conflicts are not errors: they come back as `SyncOutcome::Conflict`.
//! Everything here is either an input error (nothing was written) or a
//! store failure.

use fintrack_shared::AppError;
use thiserror::Error;

use super::types::SyncStatus;
use crate::ledger::LedgerError;
use crate::storage::StorageError;

/// Errors that can occur during offline sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Payload has no client id.
    #[error("Client id cannot be empty")]
    EmptyClientId,

    /// Payload failed ledger validation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Resolution action is not recognised.
    #[error("Unknown resolution action: {0}")]
    UnknownResolution(String),

    /// `merge` was requested without a merged payload.
    #[error("Merge resolution requires a merged payload")]
    MergePayloadRequired,

    /// No sync record exists for the client id.
    #[error("Sync record not found for client id {0}")]
    RecordNotFound(String),

    /// Resolution was requested for a record that is not in conflict.
    #[error("Sync record {client_id} is {status}, not in conflict")]
    NotInConflict {
        /// Client id of the record.
        client_id: String,
        /// Its current status.
        status: SyncStatus,
    },

    /// The state machine forbids the requested move.
    #[error("Invalid sync status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: SyncStatus,
        /// Requested status.
        to: SyncStatus,
    },

    /// The record changed shape while its locks were being taken.
    #[error("Sync record {0} changed concurrently, please retry")]
    ConcurrentModification(String),

    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Returns the error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyClientId => "EMPTY_CLIENT_ID",
            Self::Ledger(e) => e.error_code(),
            Self::UnknownResolution(_) => "UNKNOWN_RESOLUTION",
            Self::MergePayloadRequired => "MERGE_PAYLOAD_REQUIRED",
            Self::RecordNotFound(_) => "SYNC_RECORD_NOT_FOUND",
            Self::NotInConflict { .. } => "SYNC_RECORD_NOT_IN_CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_SYNC_TRANSITION",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Ledger(e) => e.into(),
            SyncError::Storage(e) => e.into(),
            SyncError::RecordNotFound(_) => Self::NotFound(err.to_string()),
            SyncError::ConcurrentModification(_) => Self::Conflict(err.to_string()),
            SyncError::InvalidTransition { .. } | SyncError::NotInConflict { .. } => {
                Self::BusinessRule(err.to_string())
            }
            SyncError::EmptyClientId
            | SyncError::UnknownResolution(_)
            | SyncError::MergePayloadRequired => Self::Validation(err.to_string()),
        }
    }
}
