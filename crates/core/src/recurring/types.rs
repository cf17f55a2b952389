//! Recurring template domain types.

use chrono::{DateTime, NaiveDate, Utc};
use fintrack_shared::AppError;
use fintrack_shared::types::{
    AccountId, CategoryId, RecurringTemplateId, TransactionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{LedgerEffect, Transaction, TransactionType};
use crate::storage::{LockKey, LockSet};

/// How often a recurring transaction repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every `interval` days.
    Daily,
    /// Every `interval` weeks.
    Weekly,
    /// Every `interval` months.
    Monthly,
    /// Every `3 * interval` months.
    Quarterly,
    /// Every `interval` years.
    Yearly,
}

impl Frequency {
    /// Returns the string representation of the frequency.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Parses a frequency. Anything unrecognised is treated as monthly.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "quarterly" => Self::Quarterly,
            "yearly" => Self::Yearly,
            _ => Self::Monthly,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recurrence descriptor carried by a recurring transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// Step unit.
    pub frequency: Frequency,
    /// Number of units per step.
    pub interval: u32,
    /// Last date an occurrence may fall on.
    pub end_date: Option<NaiveDate>,
}

/// A recurring transaction template.
///
/// The template is `active` until it runs out of occurrences or passes its
/// end date; `inactive` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringTemplate {
    /// The template ID.
    pub id: RecurringTemplateId,
    /// Owner.
    pub user_id: UserId,
    /// Primary account.
    pub account_id: AccountId,
    /// Destination account for transfers.
    pub transfer_account_id: Option<AccountId>,
    /// Category.
    pub category_id: Option<CategoryId>,
    /// Description copied onto each occurrence.
    pub description: String,
    /// Non-negative amount.
    pub amount: Decimal,
    /// Transaction type.
    pub kind: TransactionType,
    /// Step unit.
    pub frequency: Frequency,
    /// Number of units per step.
    pub interval: u32,
    /// Date of the first instance.
    pub start_date: NaiveDate,
    /// Last date an occurrence may fall on.
    pub end_date: Option<NaiveDate>,
    /// Date of the next occurrence to materialize.
    pub next_occurrence: NaiveDate,
    /// Occurrences produced so far, the first instance included.
    pub occurrences_count: u32,
    /// Upper bound on occurrences, derived from `end_date`.
    pub max_occurrences: Option<u32>,
    /// Whether the template still produces occurrences.
    pub is_active: bool,
    /// Transaction the template was created from.
    pub source_transaction_id: Option<TransactionId>,
}

impl RecurringTemplate {
    /// Builds the template for a recurring transaction's first instance.
    ///
    /// `next_occurrence` and `max_occurrences` are computed by the caller
    /// from the schedule.
    #[must_use]
    pub fn from_first_instance(
        tx: &Transaction,
        recurrence: &Recurrence,
        next_occurrence: NaiveDate,
        max_occurrences: Option<u32>,
    ) -> Self {
        Self {
            id: RecurringTemplateId::new(),
            user_id: tx.user_id,
            account_id: tx.account_id,
            transfer_account_id: tx.transfer_account_id,
            category_id: tx.category_id,
            description: tx.description.clone(),
            amount: tx.amount,
            kind: tx.kind,
            frequency: recurrence.frequency,
            interval: recurrence.interval,
            start_date: tx.date,
            end_date: recurrence.end_date,
            next_occurrence,
            occurrences_count: 1,
            max_occurrences,
            is_active: true,
            source_transaction_id: Some(tx.id),
        }
    }

    /// Returns true if an occurrence is due on or before `today`.
    #[must_use]
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.is_active && self.next_occurrence <= today
    }

    /// Returns true if `date` lies after the end date.
    #[must_use]
    pub fn is_past_end(&self, date: NaiveDate) -> bool {
        self.end_date.is_some_and(|end| date > end)
    }

    /// Returns true if the occurrence cap has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_occurrences
            .is_some_and(|max| self.occurrences_count >= max)
    }

    /// Returns true if the template may materialize an occurrence on `today`.
    #[must_use]
    pub fn is_eligible(&self, today: NaiveDate) -> bool {
        self.is_due(today) && !self.is_past_end(today) && !self.is_exhausted()
    }

    /// Balance effect of the next occurrence.
    #[must_use]
    pub fn occurrence_effect(&self) -> LedgerEffect {
        LedgerEffect {
            account_id: self.account_id,
            transfer_account_id: self.transfer_account_id,
            amount: self.amount,
            kind: self.kind,
            date: self.next_occurrence,
        }
    }

    /// Row locks needed to materialize an occurrence.
    #[must_use]
    pub fn lock_set(&self) -> LockSet {
        let mut locks = self.occurrence_effect().lock_set();
        locks.insert(LockKey::RecurringTemplate(self.id));
        locks
    }

    /// Builds the uncleared transaction for the next occurrence.
    #[must_use]
    pub fn materialize(&self, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            user_id: self.user_id,
            account_id: self.account_id,
            transfer_account_id: self.transfer_account_id,
            category_id: self.category_id,
            amount: self.amount,
            kind: self.kind,
            date: self.next_occurrence,
            description: self.description.clone(),
            notes: None,
            reference_number: None,
            recurrence: None,
            is_cleared: false,
            recurring_template_id: Some(self.id),
            client_id: None,
            created_at,
            deleted_at: None,
        }
    }
}

/// A transaction produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedOccurrence {
    /// Source template.
    pub template_id: RecurringTemplateId,
    /// The new transaction.
    pub transaction_id: TransactionId,
    /// Occurrence date.
    pub date: NaiveDate,
    /// Amount booked.
    pub amount: Decimal,
}

/// A template that could not be processed in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateFailure {
    /// The template.
    pub template_id: RecurringTemplateId,
    /// Stable error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Whether the next run may succeed.
    pub retryable: bool,
}

impl TemplateFailure {
    /// Builds a failure entry from a classified error.
    #[must_use]
    pub fn new(template_id: RecurringTemplateId, error: &AppError) -> Self {
        Self {
            template_id,
            code: error.error_code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Outcome of one `process_due` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecurringRunReport {
    /// Date the run processed.
    pub run_date: NaiveDate,
    /// Occurrences created.
    pub materialized: Vec<MaterializedOccurrence>,
    /// Templates deactivated during the run.
    pub deactivated: Vec<RecurringTemplateId>,
    /// Templates that failed; each rolled back independently.
    pub failures: Vec<TemplateFailure>,
}

impl RecurringRunReport {
    /// Creates an empty report for `run_date`.
    #[must_use]
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            materialized: Vec::new(),
            deactivated: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Returns true if nothing happened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materialized.is_empty() && self.deactivated.is_empty() && self.failures.is_empty()
    }
}
