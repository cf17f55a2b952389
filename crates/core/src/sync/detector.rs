//! Heuristic duplicate/conflict detection for offline payloads.
//!
//! The detector is advisory. It can miss a true duplicate whose description
//! was edited on the client, and it can flag a genuine second purchase as a
//! conflict; both cases end in a user decision rather than silent data loss.

use chrono::TimeDelta;
use fintrack_shared::config::SyncConfig;
use rust_decimal::Decimal;
use tracing::debug;

use super::types::{Classification, ConflictDetail, SyncPayload};
use crate::ledger::{Account, Transaction};

/// Classifies a payload against server state.
#[derive(Debug, Clone)]
pub struct SyncConflictDetector {
    duplicate_window: TimeDelta,
    prefix_len: usize,
    mismatch_threshold: Decimal,
}

impl SyncConflictDetector {
    /// Creates a detector with the configured thresholds.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            duplicate_window: TimeDelta::try_seconds(config.duplicate_window_secs.max(0))
                .unwrap_or(TimeDelta::MAX),
            prefix_len: config.description_prefix_len,
            mismatch_threshold: config.balance_mismatch_threshold,
        }
    }

    /// Leading characters of `description` used for matching.
    #[must_use]
    pub fn prefix<'a>(&self, description: &'a str) -> &'a str {
        match description.char_indices().nth(self.prefix_len) {
            Some((end, _)) => &description[..end],
            None => description,
        }
    }

    /// Returns true if `candidate` shares the payload's description prefix.
    #[must_use]
    pub fn is_candidate(&self, payload: &SyncPayload, candidate: &Transaction) -> bool {
        candidate.account_id == payload.account_id
            && candidate.date == payload.date
            && !candidate.is_deleted()
            && candidate
                .description
                .starts_with(self.prefix(&payload.description))
    }

    /// Classifies `payload`.
    ///
    /// `existing` holds the live transactions on the payload's account and
    /// date; `account` is the payload's primary account as currently stored.
    #[must_use]
    pub fn classify(
        &self,
        payload: &SyncPayload,
        existing: &[Transaction],
        account: &Account,
    ) -> Classification {
        let mut conflicts = Vec::new();

        for candidate in existing.iter().filter(|tx| self.is_candidate(payload, tx)) {
            let gap = candidate.created_at - payload.created_at_client;
            if candidate.amount == payload.amount && gap.abs() < self.duplicate_window {
                debug!(
                    client_id = %payload.client_id,
                    transaction_id = %candidate.id,
                    "Payload classified as duplicate"
                );
                return Classification::Duplicate(candidate.id);
            }
            conflicts.push(ConflictDetail::DuplicateTransaction {
                existing_transaction_id: candidate.id,
                existing_amount: candidate.amount,
                incoming_amount: payload.amount,
                time_gap_secs: gap.num_seconds().abs(),
            });
        }

        let delta = account
            .kind
            .balance_rule()
            .primary_delta(payload.kind, payload.amount);
        if delta.abs() > self.mismatch_threshold {
            conflicts.push(ConflictDetail::BalanceMismatch {
                expected_balance: account.balance + delta,
                actual_balance: account.balance,
                difference: delta,
            });
        }

        debug!(
            client_id = %payload.client_id,
            conflicts = conflicts.len(),
            "Payload classified"
        );
        if conflicts.is_empty() {
            Classification::NoConflict
        } else {
            Classification::Conflict(conflicts)
        }
    }
}

impl Default for SyncConflictDetector {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}
