//! Recurring transaction templates.
//!
//! This module implements:
//! - Occurrence date arithmetic (`schedule`)
//! - Template domain types and run reports
//! - The engine that materializes due templates

pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

#[cfg(test)]
mod schedule_props;

pub use engine::RecurringEngine;
pub use error::RecurringError;
pub use schedule::{DEFAULT_MAX_OCCURRENCE_STEPS, compute_max_occurrences, compute_next_occurrence};
pub use types::{
    Frequency, MaterializedOccurrence, Recurrence, RecurringRunReport, RecurringTemplate,
    TemplateFailure,
};
