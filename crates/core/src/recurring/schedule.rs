//! Occurrence date arithmetic.
//!
//! Month-based steps clamp to the last day of the target month, so a
//! schedule starting on Jan 31 yields Feb 28 (or 29) rather than spilling
//! into March.

use chrono::{Days, Months, NaiveDate};

use super::types::Frequency;

/// Default cap on the number of steps `compute_max_occurrences` will take.
pub const DEFAULT_MAX_OCCURRENCE_STEPS: u32 = 1000;

/// Date of the occurrence after `from`.
///
/// Returns `None` when the result falls outside the supported calendar
/// range. A zero `interval` returns `from` itself.
#[must_use]
pub fn compute_next_occurrence(
    from: NaiveDate,
    frequency: Frequency,
    interval: u32,
) -> Option<NaiveDate> {
    match frequency {
        Frequency::Daily => from.checked_add_days(Days::new(u64::from(interval))),
        Frequency::Weekly => from.checked_add_days(Days::new(u64::from(interval) * 7)),
        Frequency::Monthly => from.checked_add_months(Months::new(interval)),
        Frequency::Quarterly => from.checked_add_months(Months::new(interval.checked_mul(3)?)),
        Frequency::Yearly => from.checked_add_months(Months::new(interval.checked_mul(12)?)),
    }
}

/// Number of occurrences from `start` (inclusive) up to `end` (inclusive).
///
/// Counting stops after `max_steps` steps, which bounds degenerate schedules
/// such as a zero interval.
#[must_use]
pub fn compute_max_occurrences(
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
    interval: u32,
    max_steps: u32,
) -> u32 {
    let mut count = 0;
    let mut current = start;
    while current <= end && count < max_steps {
        count += 1;
        match compute_next_occurrence(current, frequency, interval) {
            Some(next) => current = next,
            None => break,
        }
    }
    count
}
