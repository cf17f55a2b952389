//! Property-based tests for offline sync.
//!
//! - Property 4: A client id applies at most one transaction
//! - Property 6: Prefix match within the window is a duplicate, outside it
//!   with a different amount a conflict

use std::sync::Arc;

use chrono::TimeDelta;
use fintrack_shared::config::SyncConfig;
use fintrack_shared::types::{AccountId, TransactionId};
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::detector::SyncConflictDetector;
use super::reconciler::SyncReconciler;
use super::types::{Classification, ConflictDetail, SyncOutcome, SyncPayload};
use crate::clock::FixedClock;
use crate::ledger::{Account, AccountKind, Transaction, TransactionType};
use crate::notify::NoopSink;
use crate::storage::MemoryStore;
use crate::test_support::{at, balance_of, date, seed_account, test_user};

/// Strategy to generate positive amounts (0.01 to 500.00).
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..50_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn payload(account: &Account, amount: Decimal, description: String) -> SyncPayload {
    SyncPayload {
        client_id: "offline-42".to_string(),
        account_id: account.id,
        transfer_account_id: None,
        category_id: None,
        amount,
        kind: TransactionType::Expense,
        date: date(2025, 5, 3),
        description,
        notes: None,
        reference_number: None,
        is_recurring: false,
        is_cleared: false,
        created_at_client: at(2025, 5, 3, 12, 0),
        device_id: None,
    }
}

fn server_copy(account: &Account, amount: Decimal, description: String, gap_secs: i64) -> Transaction {
    Transaction {
        id: TransactionId::new(),
        user_id: test_user(),
        account_id: account.id,
        transfer_account_id: None,
        category_id: None,
        amount,
        kind: TransactionType::Expense,
        date: date(2025, 5, 3),
        description,
        notes: None,
        reference_number: None,
        recurrence: None,
        is_cleared: true,
        recurring_template_id: None,
        client_id: None,
        created_at: at(2025, 5, 3, 12, 0) + TimeDelta::seconds(gap_secs),
        deleted_at: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 4: however often a payload is submitted, forced or not, at
    /// most one transaction carries its client id and the balance moved at
    /// most once.
    #[test]
    fn prop_client_id_applies_at_most_once(
        amount in amount_strategy(),
        forces in prop::collection::vec(any::<bool>(), 1..6),
    ) {
        let store = Arc::new(MemoryStore::new());
        let account = seed_account(&store, AccountKind::Checking, Decimal::new(1000, 0));
        let reconciler = SyncReconciler::new(
            Arc::clone(&store),
            Arc::new(FixedClock::new(at(2025, 5, 3, 12, 0))),
            Arc::new(NoopSink),
            &SyncConfig::default(),
        );
        let p = payload(&account, amount, "Hardware store".to_string());

        let mut synced_id = None;
        for force in forces {
            let outcome = reconciler.sync_one(test_user(), p.clone(), force).unwrap();
            match (synced_id, outcome) {
                (None, SyncOutcome::Synced { transaction_id }) => synced_id = Some(transaction_id),
                (Some(id), SyncOutcome::AlreadySynced { transaction_id }) => {
                    prop_assert_eq!(transaction_id, Some(id));
                }
                (None, SyncOutcome::Conflict { .. }) => {}
                (state, other) => prop_assert!(false, "unexpected {:?} after {:?}", other, state),
            }
        }

        let applied = store
            .snapshot()
            .unwrap()
            .transactions
            .iter()
            .filter(|tx| tx.client_id.as_deref() == Some("offline-42"))
            .count();
        prop_assert_eq!(applied, usize::from(synced_id.is_some()));
        let expected = if synced_id.is_some() {
            Decimal::new(1000, 0) - amount
        } else {
            Decimal::new(1000, 0)
        };
        prop_assert_eq!(balance_of(&store, account.id), expected);
    }

    /// Property 6a: same amount, shared prefix, gap under five minutes.
    #[test]
    fn prop_prefix_match_within_window_is_duplicate(
        stem in "[A-Za-z ]{20,30}",
        client_tail in "[a-z]{0,10}",
        server_tail in "[a-z]{0,10}",
        gap_secs in -299i64..300,
        amount in amount_strategy(),
    ) {
        let detector = SyncConflictDetector::default();
        let account = Account {
            id: AccountId::new(),
            user_id: test_user(),
            name: "Main".to_string(),
            kind: AccountKind::Checking,
            balance: Decimal::new(100_000, 0),
            currency: "USD".to_string(),
            is_active: true,
        };
        let p = payload(&account, amount.min(Decimal::ONE_HUNDRED), format!("{stem}{client_tail}"));
        let server = server_copy(&account, p.amount, format!("{stem}{server_tail}"), gap_secs);

        prop_assert_eq!(
            detector.classify(&p, std::slice::from_ref(&server), &account),
            Classification::Duplicate(server.id)
        );
    }

    /// Property 6b: differing amount at least five minutes apart.
    #[test]
    fn prop_differing_amount_outside_window_is_conflict(
        stem in "[A-Za-z ]{20,30}",
        gap_secs in 300i64..86_400,
        amount in amount_strategy(),
        extra in amount_strategy(),
    ) {
        let detector = SyncConflictDetector::default();
        let account = Account {
            id: AccountId::new(),
            user_id: test_user(),
            name: "Main".to_string(),
            kind: AccountKind::Checking,
            balance: Decimal::new(100_000, 0),
            currency: "USD".to_string(),
            is_active: true,
        };
        let incoming = amount.min(Decimal::ONE_HUNDRED);
        let p = payload(&account, incoming, stem.clone());
        let server = server_copy(&account, incoming + extra, stem, gap_secs);

        let verdict = detector.classify(&p, std::slice::from_ref(&server), &account);
        let Classification::Conflict(conflicts) = verdict else {
            return Err(TestCaseError::fail("expected conflict"));
        };
        prop_assert_eq!(
            conflicts,
            vec![ConflictDetail::DuplicateTransaction {
                existing_transaction_id: server.id,
                existing_amount: incoming + extra,
                incoming_amount: incoming,
                time_gap_secs: gap_secs,
            }]
        );
    }
}
