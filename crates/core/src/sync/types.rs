//! Offline sync domain types.
//!
//! A client that was offline submits `SyncPayload`s keyed by its own
//! `client_id`. The server keeps one `OfflineTransaction` record per
//! (user, client id) and walks it through the sync state machine:
//!
//! ```text
//! pending ──► synced
//!    │  └───► conflict ──► synced   (resolution)
//!    │            └──────► pending  (forced resubmission)
//!    └──────► failed ────► pending  (retry)
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use fintrack_shared::AppError;
use fintrack_shared::types::{AccountId, CategoryId, SyncRecordId, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SyncError;
use crate::ledger::{LedgerEffect, LedgerMutator, Transaction, TransactionType};
use crate::storage::{LockKey, LockSet};

/// Transaction as captured by an offline client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Client-generated idempotency key.
    pub client_id: String,
    /// Primary account.
    pub account_id: AccountId,
    /// Destination account, required for transfers.
    #[serde(default)]
    pub transfer_account_id: Option<AccountId>,
    /// Category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Non-negative amount.
    pub amount: Decimal,
    /// Transaction type.
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Booking date.
    pub date: NaiveDate,
    /// Description.
    pub description: String,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// External reference.
    #[serde(default)]
    pub reference_number: Option<String>,
    /// Whether the client marked the transaction as recurring.
    #[serde(default)]
    pub is_recurring: bool,
    /// Whether the transaction has cleared.
    #[serde(default)]
    pub is_cleared: bool,
    /// When the client created the transaction.
    pub created_at_client: DateTime<Utc>,
    /// Submitting device.
    #[serde(default)]
    pub device_id: Option<String>,
}

impl SyncPayload {
    /// Balance effect the payload would have once applied.
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

    /// Checks the payload shape.
    ///
    /// # Errors
    ///
    /// `EmptyClientId`, or the ledger validation error of its effect.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.client_id.trim().is_empty() {
            return Err(SyncError::EmptyClientId);
        }
        LedgerMutator::validate(&self.effect())?;
        Ok(())
    }

    /// Row locks needed to apply the payload for `user_id`.
    #[must_use]
    pub fn lock_set(&self, user_id: UserId) -> LockSet {
        let mut locks = self.effect().lock_set();
        locks.insert(LockKey::SyncRecord(user_id, self.client_id.clone()));
        locks
    }

    /// Builds the server transaction for this payload.
    #[must_use]
    pub fn to_transaction(&self, user_id: UserId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            user_id,
            account_id: self.account_id,
            transfer_account_id: self.transfer_account_id,
            category_id: self.category_id,
            amount: self.amount,
            kind: self.kind,
            date: self.date,
            description: self.description.clone(),
            notes: self.notes.clone(),
            reference_number: self.reference_number.clone(),
            recurrence: None,
            is_cleared: self.is_cleared,
            recurring_template_id: None,
            client_id: Some(self.client_id.clone()),
            created_at,
            deleted_at: None,
        }
    }
}

/// Sync record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Received, not yet settled.
    Pending,
    /// Settled against a server transaction.
    Synced,
    /// Parked until the user resolves it.
    Conflict,
    /// Applying failed; may be retried.
    Failed,
}

impl SyncStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "synced" => Some(Self::Synced),
            "conflict" => Some(Self::Conflict),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true if a record may move from this status to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Synced | Self::Conflict | Self::Failed)
                | (Self::Conflict, Self::Synced | Self::Pending)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Returns true if the record is settled for good.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Synced
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a payload was parked as a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictDetail {
    /// A server transaction looks like the same purchase.
    DuplicateTransaction {
        /// The similar server transaction.
        existing_transaction_id: TransactionId,
        /// Its amount.
        existing_amount: Decimal,
        /// Amount of the incoming payload.
        incoming_amount: Decimal,
        /// Seconds between the server and client creation times.
        time_gap_secs: i64,
    },
    /// Applying the payload would move the balance further than expected.
    BalanceMismatch {
        /// Balance after applying the payload.
        expected_balance: Decimal,
        /// Current server balance.
        actual_balance: Decimal,
        /// `expected_balance - actual_balance`.
        difference: Decimal,
    },
}

impl ConflictDetail {
    /// Server transaction named by a duplicate-transaction conflict.
    #[must_use]
    pub fn existing_transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::DuplicateTransaction {
                existing_transaction_id,
                ..
            } => Some(*existing_transaction_id),
            Self::BalanceMismatch { .. } => None,
        }
    }
}

/// Failure detail stored on a failed sync record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Stable error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Whether a retry may succeed.
    pub retryable: bool,
}

impl From<&AppError> for SyncFailure {
    fn from(error: &AppError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Server-side record of one offline transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineTransaction {
    /// The record ID.
    pub id: SyncRecordId,
    /// Owner.
    pub user_id: UserId,
    /// Client-generated idempotency key.
    pub client_id: String,
    /// Submitting device.
    pub device_id: Option<String>,
    /// Latest payload received for this client id.
    pub payload: SyncPayload,
    /// Sync state.
    pub status: SyncStatus,
    /// Server transaction the record settled against.
    pub server_transaction_id: Option<TransactionId>,
    /// Conflict detail; non-empty iff `status` is `Conflict`.
    #[serde(default)]
    pub conflicts: Vec<ConflictDetail>,
    /// Failure detail; set iff `status` is `Failed`.
    #[serde(default)]
    pub failure: Option<SyncFailure>,
    /// Number of sync attempts.
    pub attempts: u32,
    /// Time of the last attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// First time the server saw this client id.
    pub created_at: DateTime<Utc>,
    /// Last change of the record.
    pub updated_at: DateTime<Utc>,
}

impl OfflineTransaction {
    /// Creates a pending record for a first submission.
    #[must_use]
    pub fn new(user_id: UserId, payload: SyncPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: SyncRecordId::new(),
            user_id,
            client_id: payload.client_id.clone(),
            device_id: payload.device_id.clone(),
            payload,
            status: SyncStatus::Pending,
            server_transaction_id: None,
            conflicts: Vec::new(),
            failure: None,
            attempts: 0,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the record to `next`, clearing detail that no longer applies.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the state machine forbids the move.
    pub fn transition(&mut self, next: SyncStatus, now: DateTime<Utc>) -> Result<(), SyncError> {
        if !self.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        if next != SyncStatus::Conflict {
            self.conflicts.clear();
        }
        if next != SyncStatus::Failed {
            self.failure = None;
        }
        Ok(())
    }

    /// Marks the record synced against `transaction_id`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the record is pending or in conflict.
    pub fn mark_synced(
        &mut self,
        transaction_id: Option<TransactionId>,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.transition(SyncStatus::Synced, now)?;
        self.server_transaction_id = transaction_id;
        Ok(())
    }

    /// Marks the record conflicting.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the record is pending.
    pub fn mark_conflict(
        &mut self,
        conflicts: Vec<ConflictDetail>,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.transition(SyncStatus::Conflict, now)?;
        self.conflicts = conflicts;
        Ok(())
    }

    /// Marks the record failed.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the record is pending.
    pub fn mark_failed(&mut self, failure: SyncFailure, now: DateTime<Utc>) -> Result<(), SyncError> {
        self.transition(SyncStatus::Failed, now)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Counts a new attempt with `payload`.
    pub fn begin_attempt(&mut self, payload: SyncPayload, now: DateTime<Utc>) {
        self.device_id.clone_from(&payload.device_id);
        self.payload = payload;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
    }
}

/// Verdict of the conflict detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Nothing similar on the server.
    NoConflict,
    /// The payload is already present as this server transaction.
    Duplicate(TransactionId),
    /// The payload needs a user decision.
    Conflict(Vec<ConflictDetail>),
}

/// Result of submitting one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// A new server transaction was created.
    Synced {
        /// The new transaction.
        transaction_id: TransactionId,
    },
    /// The client id was settled earlier.
    AlreadySynced {
        /// Transaction the record settled against, if any.
        transaction_id: Option<TransactionId>,
    },
    /// The payload matched an existing transaction.
    Duplicate {
        /// The matching transaction.
        transaction_id: TransactionId,
    },
    /// The payload was parked for resolution.
    Conflict {
        /// Why.
        conflicts: Vec<ConflictDetail>,
    },
    /// Applying failed and the record was marked failed.
    Failed {
        /// Failure detail.
        failure: SyncFailure,
    },
}

impl SyncOutcome {
    /// Server transaction the outcome points at, if any.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::Synced { transaction_id } | Self::Duplicate { transaction_id } => {
                Some(*transaction_id)
            }
            Self::AlreadySynced { transaction_id } => *transaction_id,
            Self::Conflict { .. } | Self::Failed { .. } => None,
        }
    }
}

/// How the user settles a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the client's version.
    UseClient,
    /// Keep the server's version.
    UseServer,
    /// Apply a merged payload supplied with the resolution.
    Merge,
}

impl Resolution {
    /// Returns the string representation of the action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseClient => "use_client",
            Self::UseServer => "use_server",
            Self::Merge => "merge",
        }
    }

    /// Parses an action string.
    ///
    /// # Errors
    ///
    /// `UnknownResolution` for anything but `use_client`, `use_server` or
    /// `merge`.
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        match s {
            "use_client" => Ok(Self::UseClient),
            "use_server" => Ok(Self::UseServer),
            "merge" => Ok(Self::Merge),
            other => Err(SyncError::UnknownResolution(other.to_string())),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-status record counts for a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Pending records.
    pub pending: usize,
    /// Synced records.
    pub synced: usize,
    /// Records in conflict.
    pub conflict: usize,
    /// Failed records.
    pub failed: usize,
}

impl SyncSummary {
    /// Total number of records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.synced + self.conflict + self.failed
    }

    /// Counts `status` once.
    pub fn count(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::Conflict => self.conflict += 1,
            SyncStatus::Failed => self.failed += 1,
        }
    }
}

/// Result for one payload of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Client id of the payload.
    pub client_id: String,
    /// Outcome, or the input error that rejected the payload.
    pub result: Result<SyncOutcome, SyncError>,
}
