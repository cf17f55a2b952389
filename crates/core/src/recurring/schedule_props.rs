//! Property-based tests for occurrence scheduling.
//!
//! - Property 5: occurrence counting is bounded and bounded templates retire

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use fintrack_shared::config::RecurringConfig;
use fintrack_shared::types::RecurringTemplateId;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::engine::RecurringEngine;
use super::schedule::{DEFAULT_MAX_OCCURRENCE_STEPS, compute_max_occurrences, compute_next_occurrence};
use super::types::{Frequency, RecurringTemplate};
use crate::clock::FixedClock;
use crate::ledger::{AccountKind, TransactionType};
use crate::notify::NoopSink;
use crate::storage::{LedgerStore, LockKey, MemoryStore, UnitOfWork};
use crate::test_support::{date, seed_account, test_user};

fn frequency_strategy() -> impl Strategy<Value = Frequency> {
    prop_oneof![
        Just(Frequency::Daily),
        Just(Frequency::Weekly),
        Just(Frequency::Monthly),
        Just(Frequency::Quarterly),
        Just(Frequency::Yearly),
    ]
}

/// Strategy to generate dates between 2000-01-01 and roughly 2040.
fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0u64..15_000u64).prop_map(|offset| date(2000, 1, 1) + Days::new(offset))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 5.1: the count never exceeds the step cap, even for a zero
    /// interval.
    #[test]
    fn prop_max_occurrences_capped(
        start in date_strategy(),
        span in 0u64..20_000u64,
        frequency in frequency_strategy(),
        interval in 0u32..4u32,
    ) {
        let end = start + Days::new(span);
        let count = compute_max_occurrences(start, end, frequency, interval, DEFAULT_MAX_OCCURRENCE_STEPS);
        prop_assert!(count <= DEFAULT_MAX_OCCURRENCE_STEPS);
        prop_assert!(count >= 1, "start itself is always an occurrence");
        if interval == 0 {
            prop_assert_eq!(count, DEFAULT_MAX_OCCURRENCE_STEPS);
        }
    }

    /// Property 5.2: next occurrence is strictly later for a positive
    /// interval.
    #[test]
    fn prop_next_occurrence_advances(
        from in date_strategy(),
        frequency in frequency_strategy(),
        interval in 1u32..12u32,
    ) {
        let next = compute_next_occurrence(from, frequency, interval).unwrap();
        prop_assert!(next > from);
    }

    /// Property 5.3: repeated runs deactivate a template bounded by an end
    /// date after at most `max_occurrences` runs, booking one occurrence per
    /// remaining slot.
    #[test]
    fn prop_bounded_template_retires(
        start in date_strategy(),
        span in 0u64..400u64,
        frequency in prop_oneof![Just(Frequency::Weekly), Just(Frequency::Monthly)],
    ) {
        let end = start + Days::new(span);
        let max = compute_max_occurrences(start, end, frequency, 1, DEFAULT_MAX_OCCURRENCE_STEPS);
        let store = Arc::new(MemoryStore::new());
        let account = seed_account(&store, AccountKind::Cash, Decimal::ZERO);
        let template = RecurringTemplate {
            id: RecurringTemplateId::new(),
            user_id: test_user(),
            account_id: account.id,
            transfer_account_id: None,
            category_id: None,
            description: "Allowance".to_string(),
            amount: Decimal::ONE,
            kind: TransactionType::Income,
            frequency,
            interval: 1,
            start_date: start,
            end_date: Some(end),
            next_occurrence: compute_next_occurrence(start, frequency, 1).unwrap(),
            occurrences_count: 1,
            max_occurrences: Some(max),
            // A single-slot schedule is exhausted by its first instance.
            is_active: max > 1,
            source_transaction_id: None,
        };
        let mut uow = store
            .begin([LockKey::RecurringTemplate(template.id)].into_iter().collect())
            .unwrap();
        uow.save_recurring_template(&template).unwrap();
        uow.commit().unwrap();

        let engine = RecurringEngine::new(
            Arc::clone(&store),
            Arc::new(FixedClock::at_date(end)),
            Arc::new(NoopSink),
            RecurringConfig::default(),
        );

        let mut runs = 0u32;
        while store.recurring_template(template.id).unwrap().unwrap().is_active {
            engine.process_due(end).unwrap();
            runs += 1;
            prop_assert!(runs <= max, "still active after {} runs", runs);
        }

        let booked = store.account(account.id).unwrap().unwrap().balance;
        prop_assert_eq!(booked, Decimal::from(max - 1));
    }
}
