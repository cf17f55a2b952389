//! Offline sync reconciliation.
//!
//! This module implements:
//! - Sync payloads, records and the sync status state machine
//! - The duplicate/conflict detector
//! - The reconciler that applies, parks, fails and resolves payloads

pub mod detector;
pub mod error;
pub mod reconciler;
pub mod types;

#[cfg(test)]
mod props;
#[cfg(test)]
mod tests;

pub use detector::SyncConflictDetector;
pub use error::SyncError;
pub use reconciler::SyncReconciler;
pub use types::{
    BatchItem, Classification, ConflictDetail, OfflineTransaction, Resolution, SyncFailure,
    SyncOutcome, SyncPayload, SyncStatus, SyncSummary,
};
