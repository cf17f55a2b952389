//! Offline sync reconciliation.
//!
//! Owns the per-(user, client id) state machine. Every decision is taken
//! under the sync record's row lock after re-reading the record, which is
//! what makes a client id apply at most one transaction however many times
//! it is submitted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fintrack_shared::AppError;
use fintrack_shared::config::SyncConfig;
use fintrack_shared::types::{TransactionId, UserId};
use tracing::{info, warn};

use super::detector::SyncConflictDetector;
use super::error::SyncError;
use super::types::{
    BatchItem, Classification, ConflictDetail, OfflineTransaction, Resolution, SyncFailure, SyncOutcome,
    SyncPayload, SyncStatus, SyncSummary,
};
use crate::clock::Clock;
use crate::ledger::{LedgerMutator, Tombstone};
use crate::notify::{LedgerEvent, NotificationSink, publish};
use crate::storage::{LedgerStore, LockKey, LockSet, UnitOfWork};

/// Attempts at locking a record whose stored payload keeps changing.
const LOCK_ATTEMPTS: usize = 3;

/// Sync reconciler.
pub struct SyncReconciler<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    detector: SyncConflictDetector,
}

impl<S: LedgerStore> SyncReconciler<S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            clock,
            sink,
            detector: SyncConflictDetector::new(config),
        }
    }

    /// Submits one offline payload.
    ///
    /// `force` skips conflict detection. It never bypasses the idempotency
    /// key: a synced client id always answers `AlreadySynced`.
    ///
    /// # Errors
    ///
    /// Input errors (invalid payload, unknown account) and store failures
    /// that prevent the outcome from being recorded. A failure while writing
    /// the transaction is not an error: it is recorded and returned as
    /// `SyncOutcome::Failed`.
    pub fn sync_one(
        &self,
        user_id: UserId,
        payload: SyncPayload,
        force: bool,
    ) -> Result<SyncOutcome, SyncError> {
        payload.validate()?;
        let now = self.clock.now();
        let mut uow = self.store.begin(payload.lock_set(user_id))?;

        let mut record = match uow.sync_record(user_id, &payload.client_id)? {
            Some(existing) if existing.status == SyncStatus::Synced => {
                info!(
                    user_id = %user_id,
                    client_id = %payload.client_id,
                    "Offline transaction already synced"
                );
                return Ok(SyncOutcome::AlreadySynced {
                    transaction_id: existing.server_transaction_id,
                });
            }
            Some(existing) if existing.status == SyncStatus::Conflict && !force => {
                return Ok(SyncOutcome::Conflict {
                    conflicts: existing.conflicts,
                });
            }
            Some(mut existing) => {
                if existing.status != SyncStatus::Pending {
                    existing.transition(SyncStatus::Pending, now)?;
                }
                existing
            }
            None => OfflineTransaction::new(user_id, payload.clone(), now),
        };

        LedgerMutator::check_ownership(&uow, &payload.effect(), user_id)?;
        let account = uow.account(payload.account_id)?;
        record.begin_attempt(payload.clone(), now);

        if !force {
            let existing = uow.transactions_on(payload.account_id, payload.date)?;
            match self.detector.classify(&payload, &existing, &account) {
                Classification::NoConflict => {}
                Classification::Duplicate(transaction_id) => {
                    record.mark_synced(Some(transaction_id), now)?;
                    uow.save_sync_record(&record)?;
                    uow.commit()?;
                    info!(
                        user_id = %user_id,
                        client_id = %record.client_id,
                        transaction_id = %transaction_id,
                        "Offline transaction matched existing transaction"
                    );
                    return Ok(SyncOutcome::Duplicate { transaction_id });
                }
                Classification::Conflict(conflicts) => {
                    record.mark_conflict(conflicts.clone(), now)?;
                    uow.save_sync_record(&record)?;
                    uow.commit()?;
                    warn!(
                        user_id = %user_id,
                        client_id = %record.client_id,
                        conflicts = conflicts.len(),
                        "Offline transaction conflicts with server state"
                    );
                    publish(
                        self.sink.as_ref(),
                        &LedgerEvent::ConflictDetected {
                            user_id,
                            client_id: record.client_id.clone(),
                            conflicts: conflicts.clone(),
                        },
                    );
                    return Ok(SyncOutcome::Conflict { conflicts });
                }
            }
        }

        match Self::commit_transaction(uow, &mut record, &payload, now) {
            Ok(transaction_id) => {
                info!(
                    user_id = %user_id,
                    client_id = %record.client_id,
                    transaction_id = %transaction_id,
                    forced = force,
                    "Offline transaction synced"
                );
                Ok(SyncOutcome::Synced { transaction_id })
            }
            Err(e) => self.record_failure(user_id, &payload, &e, now),
        }
    }

    /// Submits every payload independently; one failure never blocks the
    /// rest.
    pub fn sync_batch(
        &self,
        user_id: UserId,
        payloads: Vec<SyncPayload>,
        force: bool,
    ) -> Vec<BatchItem> {
        payloads
            .into_iter()
            .map(|payload| {
                let client_id = payload.client_id.clone();
                let result = self.sync_one(user_id, payload, force);
                if let Err(e) = &result {
                    warn!(user_id = %user_id, client_id = %client_id, error = %e, "Offline payload rejected");
                }
                BatchItem { client_id, result }
            })
            .collect()
    }

    /// Settles a conflict.
    ///
    /// `action` is one of `use_client`, `use_server` or `merge`; `merge`
    /// requires `merged`.
    ///
    /// # Errors
    ///
    /// Unknown action, missing merge payload, unknown client id, a record not
    /// in conflict, an invalid merged payload, or a store failure. On error
    /// the record keeps its conflict status.
    pub fn resolve_conflict(
        &self,
        user_id: UserId,
        client_id: &str,
        action: &str,
        merged: Option<SyncPayload>,
    ) -> Result<SyncOutcome, SyncError> {
        let resolution = Resolution::parse(action)?;
        let merged = match (resolution, merged) {
            (Resolution::Merge, None) => return Err(SyncError::MergePayloadRequired),
            (Resolution::Merge, Some(mut payload)) => {
                client_id.clone_into(&mut payload.client_id);
                payload.validate()?;
                Some(payload)
            }
            (_, _) => None,
        };

        let extra = merged
            .as_ref()
            .map(|p| p.lock_set(user_id))
            .unwrap_or_default();
        let (mut uow, mut record) = self.lock_record(user_id, client_id, extra)?;
        if record.status != SyncStatus::Conflict {
            return Err(SyncError::NotInConflict {
                client_id: client_id.to_string(),
                status: record.status,
            });
        }

        let now = self.clock.now();
        let transaction_id = match resolution {
            Resolution::UseServer => {
                let server_id = record
                    .conflicts
                    .iter()
                    .find_map(ConflictDetail::existing_transaction_id);
                record.mark_synced(server_id, now)?;
                uow.save_sync_record(&record)?;
                uow.commit()?;
                server_id
            }
            Resolution::UseClient => {
                let payload = record.payload.clone();
                Some(Self::commit_transaction(uow, &mut record, &payload, now)?)
            }
            Resolution::Merge => {
                let Some(payload) = merged else {
                    return Err(SyncError::MergePayloadRequired);
                };
                record.begin_attempt(payload.clone(), now);
                Some(Self::commit_transaction(uow, &mut record, &payload, now)?)
            }
        };

        info!(
            user_id = %user_id,
            client_id = %client_id,
            resolution = %resolution,
            transaction_id = ?transaction_id,
            "Sync conflict resolved"
        );
        Ok(match transaction_id {
            Some(transaction_id) if resolution != Resolution::UseServer => {
                SyncOutcome::Synced { transaction_id }
            }
            _ => SyncOutcome::AlreadySynced { transaction_id },
        })
    }

    /// Re-submits every failed record of `user_id` with its stored payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be listed.
    pub fn retry_failed(&self, user_id: UserId) -> Result<Vec<BatchItem>, SyncError> {
        let failed: Vec<_> = self
            .store
            .sync_records(user_id)?
            .into_iter()
            .filter(|r| r.status == SyncStatus::Failed)
            .map(|r| r.payload)
            .collect();
        info!(user_id = %user_id, count = failed.len(), "Retrying failed offline transactions");
        Ok(self.sync_batch(user_id, failed, false))
    }

    /// Counts a user's sync records per status.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be listed.
    pub fn summary(&self, user_id: UserId) -> Result<SyncSummary, SyncError> {
        let mut summary = SyncSummary::default();
        for record in self.store.sync_records(user_id)? {
            summary.count(record.status);
        }
        Ok(summary)
    }

    /// Reads the sync record of a client id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn record(
        &self,
        user_id: UserId,
        client_id: &str,
    ) -> Result<Option<OfflineTransaction>, SyncError> {
        Ok(self.store.sync_record(user_id, client_id)?)
    }

    /// Entities deleted at or after `since`, for a client catching up.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn deleted_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Tombstone>, SyncError> {
        Ok(self.store.tombstones_since(user_id, since)?)
    }

    /// Inserts and applies the payload's transaction, settles the record and
    /// commits. Consumes the unit so a failure rolls everything back.
    fn commit_transaction(
        mut uow: S::Unit<'_>,
        record: &mut OfflineTransaction,
        payload: &SyncPayload,
        now: DateTime<Utc>,
    ) -> Result<TransactionId, SyncError> {
        let tx = payload.to_transaction(record.user_id, now);
        LedgerMutator::check_ownership(&uow, &tx.effect(), record.user_id)?;
        uow.insert_transaction(&tx)?;
        LedgerMutator::apply(&mut uow, &tx.effect())?;
        record.mark_synced(Some(tx.id), now)?;
        uow.save_sync_record(record)?;
        uow.commit()?;
        Ok(tx.id)
    }

    /// Marks the record failed in a unit of its own.
    fn record_failure(
        &self,
        user_id: UserId,
        payload: &SyncPayload,
        error: &SyncError,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome, SyncError> {
        let failure = SyncFailure::from(&AppError::from(error.clone()));
        let key: LockSet = [LockKey::SyncRecord(user_id, payload.client_id.clone())]
            .into_iter()
            .collect();

        let mut uow = self.store.begin(key)?;
        let mut record = match uow.sync_record(user_id, &payload.client_id)? {
            Some(existing) if existing.status == SyncStatus::Synced => {
                return Ok(SyncOutcome::AlreadySynced {
                    transaction_id: existing.server_transaction_id,
                });
            }
            Some(mut existing) => {
                if existing.status != SyncStatus::Pending {
                    existing.transition(SyncStatus::Pending, now)?;
                }
                existing
            }
            None => OfflineTransaction::new(user_id, payload.clone(), now),
        };
        record.begin_attempt(payload.clone(), now);
        record.mark_failed(failure.clone(), now)?;
        uow.save_sync_record(&record)?;
        uow.commit()?;

        warn!(
            user_id = %user_id,
            client_id = %payload.client_id,
            code = %failure.code,
            retryable = failure.retryable,
            "Offline transaction failed"
        );
        publish(
            self.sink.as_ref(),
            &LedgerEvent::SyncFailed {
                user_id,
                client_id: payload.client_id.clone(),
                failure: failure.clone(),
            },
        );
        Ok(SyncOutcome::Failed { failure })
    }

    /// Locks an existing record together with the accounts of its stored
    /// payload and `extra`, re-reading it under the lock.
    fn lock_record(
        &self,
        user_id: UserId,
        client_id: &str,
        extra: LockSet,
    ) -> Result<(S::Unit<'_>, OfflineTransaction), SyncError> {
        for _ in 0..LOCK_ATTEMPTS {
            let listed = self
                .store
                .sync_record(user_id, client_id)?
                .ok_or_else(|| SyncError::RecordNotFound(client_id.to_string()))?;
            let mut locks = listed.payload.lock_set(user_id);
            locks.extend(extra.iter().cloned());

            let uow = self.store.begin(locks)?;
            let record = uow
                .sync_record(user_id, client_id)?
                .ok_or_else(|| SyncError::RecordNotFound(client_id.to_string()))?;
            if record.payload.lock_set(user_id).is_subset(uow.locks()) {
                return Ok((uow, record));
            }
        }
        Err(SyncError::ConcurrentModification(client_id.to_string()))
    }
}
