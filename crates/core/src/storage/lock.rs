//! Row lock table.
//!
//! Grants a whole `LockSet` at once or not at all, which rules out the
//! lock-order deadlock between two transfers touching the same pair of
//! accounts in opposite directions.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{LockKey, LockSet, StorageError};

/// Table of currently held row locks.
#[derive(Debug)]
pub struct LockTable {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
    timeout: Duration,
}

impl LockTable {
    /// Creates an empty table whose acquisitions give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Blocks until every key in `keys` is free, then takes them all.
    ///
    /// # Errors
    ///
    /// `LockTimeout` if the keys are not free within the table's timeout.
    pub fn acquire(&self, keys: &LockSet) -> Result<LockGuard<'_>, StorageError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut held = self.held.lock()?;

        while keys.iter().any(|key| held.contains(key)) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::LockTimeout {
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            let (guard, _) = self.released.wait_timeout(held, deadline - now)?;
            held = guard;
        }

        held.extend(keys.iter().cloned());
        Ok(LockGuard {
            table: self,
            keys: keys.clone(),
        })
    }

    /// Returns true if `key` is currently held by some unit of work.
    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn release(&self, keys: &LockSet) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Locks held by one unit of work; released on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    keys: LockSet,
}

impl LockGuard<'_> {
    /// The keys this guard holds.
    #[must_use]
    pub fn keys(&self) -> &LockSet {
        &self.keys
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.keys);
    }
}
