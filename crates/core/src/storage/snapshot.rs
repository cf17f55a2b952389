//! Serializable image of a store's committed state.

use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::ledger::{Account, BalanceHistoryEntry, Tombstone, Transaction};
use crate::recurring::RecurringTemplate;
use crate::sync::OfflineTransaction;

/// Every table of the store as plain lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Accounts.
    #[serde(default)]
    pub accounts: Vec<Account>,
    /// Transactions, including soft-deleted ones.
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    /// Per-day balance snapshots.
    #[serde(default)]
    pub balance_history: Vec<BalanceHistoryEntry>,
    /// Recurring templates.
    #[serde(default)]
    pub recurring_templates: Vec<RecurringTemplate>,
    /// Offline sync records.
    #[serde(default)]
    pub sync_records: Vec<OfflineTransaction>,
    /// Deletion tombstones.
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

impl StoreSnapshot {
    /// Parses a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json)
            .map_err(|e| StorageError::unavailable(format!("invalid snapshot: {e}")))
    }

    /// Renders the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::unavailable(format!("cannot encode snapshot: {e}")))
    }
}
