//! Storage error types.

use fintrack_shared::AppError;
use thiserror::Error;

use super::LockKey;

/// Storage operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Row not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Row identifier.
        id: String,
    },

    /// Insert of a row that already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Entity kind.
        entity: &'static str,
        /// Row identifier.
        id: String,
    },

    /// A write touched a row the unit of work has not locked.
    #[error("lock not held for {0:?}")]
    LockNotHeld(LockKey),

    /// Row locks could not be granted in time.
    #[error("timed out after {waited_ms} ms waiting for row locks")]
    LockTimeout {
        /// How long the unit waited.
        waited_ms: u64,
    },

    /// The backing store is unavailable or failed mid-operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A lock guarding in-memory state was poisoned by a panic.
    #[error("storage state poisoned")]
    Poisoned,
}

impl StorageError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an already exists error.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Returns true if the failure is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Unavailable(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::NotFound(err.to_string()),
            StorageError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            StorageError::LockNotHeld(_) | StorageError::Poisoned => {
                Self::Internal(err.to_string())
            }
            StorageError::LockTimeout { .. } | StorageError::Unavailable(_) => {
                Self::Storage(err.to_string())
            }
        }
    }
}
