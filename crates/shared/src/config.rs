//! Application configuration management.
//!
//! Every field carries a serde default so an empty configuration is valid;
//! `AppConfig::default()` is equivalent to loading with no sources.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Offline sync reconciliation settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Recurring template materialization settings.
    #[serde(default)]
    pub recurring: RecurringConfig,
    /// Store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Worker binary settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Heuristic thresholds used by the sync conflict detector.
///
/// The defaults are the historical values of the application and have no
/// business meaning beyond that.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum gap between client and server creation time for an exact match
    /// to count as a duplicate.
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: i64,
    /// Number of leading description characters compared when matching.
    #[serde(default = "default_description_prefix_len")]
    pub description_prefix_len: usize,
    /// Balance movement above which a payload is flagged as a mismatch.
    #[serde(default = "default_balance_mismatch_threshold")]
    pub balance_mismatch_threshold: Decimal,
}

/// Longest duplicate window that still fits a millisecond time delta.
pub const MAX_DUPLICATE_WINDOW_SECS: i64 = i64::MAX / 1000;

fn default_duplicate_window_secs() -> i64 {
    300 // 5 minutes
}

fn default_description_prefix_len() -> usize {
    20
}

fn default_balance_mismatch_threshold() -> Decimal {
    Decimal::ONE_HUNDRED
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            duplicate_window_secs: default_duplicate_window_secs(),
            description_prefix_len: default_description_prefix_len(),
            balance_mismatch_threshold: default_balance_mismatch_threshold(),
        }
    }
}

impl SyncConfig {
    /// Checks that the thresholds describe a usable detector.
    ///
    /// # Errors
    ///
    /// Returns a message error for a negative or oversized duplicate window, a
    /// zero description prefix, or a negative mismatch threshold.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(0..=MAX_DUPLICATE_WINDOW_SECS).contains(&self.duplicate_window_secs) {
            return Err(config::ConfigError::Message(format!(
                "sync.duplicate_window_secs must be between 0 and {MAX_DUPLICATE_WINDOW_SECS}, got {}",
                self.duplicate_window_secs
            )));
        }
        if self.description_prefix_len == 0 {
            return Err(config::ConfigError::Message(
                "sync.description_prefix_len must be at least 1".to_string(),
            ));
        }
        if self.balance_mismatch_threshold.is_sign_negative() {
            return Err(config::ConfigError::Message(format!(
                "sync.balance_mismatch_threshold must not be negative, got {}",
                self.balance_mismatch_threshold
            )));
        }
        Ok(())
    }
}

/// Recurring template settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RecurringConfig {
    /// Hard cap on schedule steps when counting occurrences.
    #[serde(default = "default_max_occurrence_steps")]
    pub max_occurrence_steps: u32,
}

fn default_max_occurrence_steps() -> u32 {
    1000
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            max_occurrence_steps: default_max_occurrence_steps(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// How long a unit of work waits for its row locks.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Worker binary configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// JSON snapshot the worker loads and saves.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Seconds between recurring runs.
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,
    /// Run once and exit.
    #[serde(default)]
    pub run_once: bool,
}

fn default_snapshot_path() -> String {
    "data/ledger.json".to_string()
}

fn default_run_interval_secs() -> u64 {
    86400 // daily
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            run_interval_secs: default_run_interval_secs(),
            run_once: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or holds values the
    /// sync detector cannot work with.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("FINTRACK").separator("__"))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.sync.validate()?;
        Ok(config)
    }
}
