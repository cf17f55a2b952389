//! Fire-and-forget notification/audit sink.
//!
//! The engines report noteworthy outcomes through a `NotificationSink`. A
//! sink failure is logged and swallowed: it never fails or rolls back the
//! operation that produced the event.

use chrono::NaiveDate;
use fintrack_shared::types::{RecurringTemplateId, TransactionId, UserId};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::sync::{ConflictDetail, SyncFailure};

/// Something the engine wants the outside world to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// An offline payload was parked as a conflict.
    ConflictDetected {
        /// Owner.
        user_id: UserId,
        /// Client-side idempotency key.
        client_id: String,
        /// Why the payload conflicts.
        conflicts: Vec<ConflictDetail>,
    },
    /// An offline payload failed to apply.
    SyncFailed {
        /// Owner.
        user_id: UserId,
        /// Client-side idempotency key.
        client_id: String,
        /// Failure detail stored on the record.
        failure: SyncFailure,
    },
    /// A recurring template produced a transaction.
    OccurrenceMaterialized {
        /// Source template.
        template_id: RecurringTemplateId,
        /// The new transaction.
        transaction_id: TransactionId,
        /// Occurrence date.
        date: NaiveDate,
    },
    /// A recurring template became inactive.
    TemplateDeactivated {
        /// The template.
        template_id: RecurringTemplateId,
    },
}

/// Sink delivery errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not accept the event.
    #[error("Failed to deliver event: {0}")]
    Delivery(String),
}

/// Receiver of engine events.
pub trait NotificationSink: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be delivered.
    fn notify(&self, event: &LedgerEvent) -> Result<(), SinkError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _event: &LedgerEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes every event to the `tracing` log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: &LedgerEvent) -> Result<(), SinkError> {
        let payload =
            serde_json::to_string(event).map_err(|e| SinkError::Delivery(e.to_string()))?;
        info!(target: "fintrack::events", event = %payload, "Ledger event");
        Ok(())
    }
}

/// Delivers `event`, logging instead of propagating a failure.
pub fn publish(sink: &dyn NotificationSink, event: &LedgerEvent) {
    if let Err(error) = sink.notify(event) {
        warn!(%error, ?event, "Notification sink failed");
    }
}
