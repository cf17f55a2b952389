//! Reconciler scenarios against the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fintrack_shared::config::SyncConfig;
use fintrack_shared::types::{TransactionId, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::*;
use crate::clock::FixedClock;
use crate::ledger::{Account, AccountKind, LedgerError, Tombstone, TombstoneEntity, Transaction, TransactionType};
use crate::notify::LedgerEvent;
use crate::storage::{FaultPoint, LedgerStore, LockKey, MemoryStore, UnitOfWork};
use crate::test_support::{
    RecordingSink, at, balance_of, date, seed_account, seed_account_for, test_user,
};

struct Fixture {
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    reconciler: SyncReconciler<MemoryStore>,
    checking: Account,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let reconciler = SyncReconciler::new(
        Arc::clone(&store),
        Arc::new(FixedClock::new(at(2025, 5, 3, 12, 0))),
        sink.clone(),
        &SyncConfig::default(),
    );
    let checking = seed_account(&store, AccountKind::Checking, dec!(500));
    Fixture {
        store,
        sink,
        reconciler,
        checking,
    }
}

fn payload(
    account: &Account,
    client_id: &str,
    amount: Decimal,
    description: &str,
    created_at_client: DateTime<Utc>,
) -> SyncPayload {
    SyncPayload {
        client_id: client_id.to_string(),
        account_id: account.id,
        transfer_account_id: None,
        category_id: None,
        amount,
        kind: TransactionType::Expense,
        date: date(2025, 5, 3),
        description: description.to_string(),
        notes: None,
        reference_number: None,
        is_recurring: false,
        is_cleared: true,
        created_at_client,
        device_id: Some("tablet".to_string()),
    }
}

fn transactions_with_client_id(store: &MemoryStore, client_id: &str) -> Vec<Transaction> {
    store
        .snapshot()
        .unwrap()
        .transactions
        .into_iter()
        .filter(|tx| tx.client_id.as_deref() == Some(client_id))
        .collect()
}

fn synced_id(outcome: &SyncOutcome) -> TransactionId {
    match outcome {
        SyncOutcome::Synced { transaction_id } => *transaction_id,
        other => panic!("expected synced, got {other:?}"),
    }
}

#[test]
fn test_first_submission_creates_transaction() {
    let f = fixture();
    let p = payload(&f.checking, "c-1", dec!(40), "Pharmacy", at(2025, 5, 3, 9, 0));

    let outcome = f.reconciler.sync_one(test_user(), p, false).unwrap();
    let id = synced_id(&outcome);

    assert_eq!(balance_of(&f.store, f.checking.id), dec!(460));
    let record = f.reconciler.record(test_user(), "c-1").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Synced);
    assert_eq!(record.server_transaction_id, Some(id));
    assert_eq!(record.attempts, 1);
    assert_eq!(record.device_id.as_deref(), Some("tablet"));

    let tx = f.store.transaction(id).unwrap().unwrap();
    assert_eq!(tx.client_id.as_deref(), Some("c-1"));
    assert_eq!(tx.created_at, at(2025, 5, 3, 12, 0));
}

#[test]
fn test_resubmission_is_idempotent() {
    let f = fixture();
    let p = payload(&f.checking, "c-1", dec!(40), "Pharmacy", at(2025, 5, 3, 9, 0));

    let first = f.reconciler.sync_one(test_user(), p.clone(), false).unwrap();
    let second = f.reconciler.sync_one(test_user(), p.clone(), false).unwrap();
    let forced = f.reconciler.sync_one(test_user(), p, true).unwrap();

    let id = synced_id(&first);
    assert_eq!(second, SyncOutcome::AlreadySynced { transaction_id: Some(id) });
    assert_eq!(forced, SyncOutcome::AlreadySynced { transaction_id: Some(id) });
    assert_eq!(transactions_with_client_id(&f.store, "c-1").len(), 1);
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(460));
}

#[test]
fn test_concurrent_submissions_apply_once() {
    let f = fixture();
    let p = payload(&f.checking, "c-race", dec!(15), "Parking", at(2025, 5, 3, 9, 0));

    let outcomes: Vec<SyncOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let p = p.clone();
                let reconciler = &f.reconciler;
                scope.spawn(move || reconciler.sync_one(test_user(), p, false).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let synced = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Synced { .. }))
        .count();
    assert_eq!(synced, 1);
    assert_eq!(transactions_with_client_id(&f.store, "c-race").len(), 1);
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(485));
}

#[test]
fn test_similar_transaction_within_window_is_duplicate() {
    let f = fixture();
    let original = payload(&f.checking, "c-1", dec!(62.10), "Supermarket weekly groceries", at(2025, 5, 3, 11, 0));
    let id = synced_id(&f.reconciler.sync_one(test_user(), original, false).unwrap());

    // Server copy was created at 12:00; the second device captured it at 11:57.
    let again = payload(&f.checking, "c-2", dec!(62.10), "Supermarket weekly g.", at(2025, 5, 3, 11, 57));
    let outcome = f.reconciler.sync_one(test_user(), again, false).unwrap();

    assert_eq!(outcome, SyncOutcome::Duplicate { transaction_id: id });
    let record = f.reconciler.record(test_user(), "c-2").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Synced);
    assert_eq!(record.server_transaction_id, Some(id));
    assert!(transactions_with_client_id(&f.store, "c-2").is_empty());
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(437.90));
}

#[test]
fn test_similar_transaction_six_minutes_apart_is_conflict() {
    let f = fixture();
    let original = payload(&f.checking, "c-1", dec!(62.10), "Supermarket weekly groceries", at(2025, 5, 3, 11, 0));
    let id = synced_id(&f.reconciler.sync_one(test_user(), original, false).unwrap());

    let later = payload(&f.checking, "c-3", dec!(18.00), "Supermarket weekly groceries", at(2025, 5, 3, 11, 54));
    let outcome = f.reconciler.sync_one(test_user(), later, false).unwrap();

    let expected = vec![ConflictDetail::DuplicateTransaction {
        existing_transaction_id: id,
        existing_amount: dec!(62.10),
        incoming_amount: dec!(18.00),
        time_gap_secs: 360,
    }];
    assert_eq!(outcome, SyncOutcome::Conflict { conflicts: expected.clone() });

    let record = f.reconciler.record(test_user(), "c-3").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Conflict);
    assert_eq!(record.conflicts, expected);
    assert!(transactions_with_client_id(&f.store, "c-3").is_empty());
    assert!(f.sink.events().iter().any(|e| matches!(
        e,
        LedgerEvent::ConflictDetected { client_id, .. } if client_id == "c-3"
    )));
}

#[test]
fn test_conflict_resubmission_requires_force() {
    let f = fixture();
    let big = payload(&f.checking, "c-big", dec!(350), "Laptop", at(2025, 5, 3, 10, 0));

    let first = f.reconciler.sync_one(test_user(), big.clone(), false).unwrap();
    let SyncOutcome::Conflict { conflicts } = first else {
        panic!("expected balance mismatch conflict");
    };
    assert!(matches!(conflicts[0], ConflictDetail::BalanceMismatch { .. }));

    let again = f.reconciler.sync_one(test_user(), big.clone(), false).unwrap();
    assert_eq!(again, SyncOutcome::Conflict { conflicts });
    assert_eq!(f.reconciler.record(test_user(), "c-big").unwrap().unwrap().attempts, 1);

    let forced = f.reconciler.sync_one(test_user(), big, true).unwrap();
    synced_id(&forced);
    let record = f.reconciler.record(test_user(), "c-big").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Synced);
    assert!(record.conflicts.is_empty());
    assert_eq!(record.attempts, 2);
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(150));
}

#[test]
fn test_resolve_use_server_keeps_existing_transaction() {
    let f = fixture();
    let original = payload(&f.checking, "c-1", dec!(20), "Cinema tickets", at(2025, 5, 3, 11, 0));
    let id = synced_id(&f.reconciler.sync_one(test_user(), original, false).unwrap());
    let later = payload(&f.checking, "c-2", dec!(24), "Cinema tickets", at(2025, 5, 3, 10, 0));
    f.reconciler.sync_one(test_user(), later, false).unwrap();

    let outcome = f
        .reconciler
        .resolve_conflict(test_user(), "c-2", "use_server", None)
        .unwrap();

    assert_eq!(outcome, SyncOutcome::AlreadySynced { transaction_id: Some(id) });
    let record = f.reconciler.record(test_user(), "c-2").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Synced);
    assert_eq!(record.server_transaction_id, Some(id));
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(480));
}

#[test]
fn test_resolve_use_client_creates_transaction() {
    let f = fixture();
    let big = payload(&f.checking, "c-big", dec!(120), "Concert", at(2025, 5, 3, 10, 0));
    f.reconciler.sync_one(test_user(), big, false).unwrap();

    let outcome = f
        .reconciler
        .resolve_conflict(test_user(), "c-big", "use_client", None)
        .unwrap();
    let id = synced_id(&outcome);

    assert_eq!(f.store.transaction(id).unwrap().unwrap().amount, dec!(120));
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(380));

    // A settled record cannot be resolved again.
    assert_eq!(
        f.reconciler.resolve_conflict(test_user(), "c-big", "use_client", None),
        Err(SyncError::NotInConflict {
            client_id: "c-big".to_string(),
            status: SyncStatus::Synced,
        })
    );
}

#[test]
fn test_resolve_merge_applies_merged_payload() {
    let f = fixture();
    let big = payload(&f.checking, "c-big", dec!(150), "Hotel", at(2025, 5, 3, 10, 0));
    f.reconciler.sync_one(test_user(), big.clone(), false).unwrap();

    let merged = SyncPayload {
        client_id: "ignored".to_string(),
        amount: dec!(135),
        description: "Hotel (corrected)".to_string(),
        ..big
    };
    let id = synced_id(
        &f.reconciler
            .resolve_conflict(test_user(), "c-big", "merge", Some(merged))
            .unwrap(),
    );

    let tx = f.store.transaction(id).unwrap().unwrap();
    assert_eq!(tx.amount, dec!(135));
    assert_eq!(tx.client_id.as_deref(), Some("c-big"));
    let record = f.reconciler.record(test_user(), "c-big").unwrap().unwrap();
    assert_eq!(record.payload.description, "Hotel (corrected)");
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(365));
}

#[test]
fn test_resolve_input_errors() {
    let f = fixture();
    let big = payload(&f.checking, "c-big", dec!(150), "Hotel", at(2025, 5, 3, 10, 0));
    f.reconciler.sync_one(test_user(), big, false).unwrap();

    assert_eq!(
        f.reconciler.resolve_conflict(test_user(), "c-big", "keep_both", None),
        Err(SyncError::UnknownResolution("keep_both".to_string()))
    );
    assert_eq!(
        f.reconciler.resolve_conflict(test_user(), "c-big", "merge", None),
        Err(SyncError::MergePayloadRequired)
    );
    assert_eq!(
        f.reconciler.resolve_conflict(test_user(), "nope", "use_client", None),
        Err(SyncError::RecordNotFound("nope".to_string()))
    );
    assert_eq!(
        f.reconciler.record(test_user(), "c-big").unwrap().unwrap().status,
        SyncStatus::Conflict
    );
}

#[test]
fn test_write_failure_is_recorded_and_retried() {
    let f = fixture();
    let p = payload(&f.checking, "c-1", dec!(30), "Books", at(2025, 5, 3, 9, 0));

    f.store.inject_fault(FaultPoint::InsertTransaction);
    let outcome = f.reconciler.sync_one(test_user(), p, false).unwrap();

    let SyncOutcome::Failed { failure } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.code, "STORAGE_ERROR");
    assert!(failure.retryable);
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(500));
    assert!(transactions_with_client_id(&f.store, "c-1").is_empty());

    let record = f.reconciler.record(test_user(), "c-1").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Failed);
    assert_eq!(record.failure, Some(failure));
    assert_eq!(f.reconciler.summary(test_user()).unwrap().failed, 1);
    assert!(f
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, LedgerEvent::SyncFailed { .. })));

    let retried = f.reconciler.retry_failed(test_user()).unwrap();
    assert_eq!(retried.len(), 1);
    assert!(matches!(retried[0].result, Ok(SyncOutcome::Synced { .. })));
    let record = f.reconciler.record(test_user(), "c-1").unwrap().unwrap();
    assert_eq!(record.status, SyncStatus::Synced);
    assert!(record.failure.is_none());
    assert_eq!(record.attempts, 2);
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(470));
}

#[test]
fn test_unknown_account_is_input_error() {
    let f = fixture();
    let ghost = Account {
        id: fintrack_shared::types::AccountId::new(),
        ..f.checking.clone()
    };
    let p = payload(&ghost, "c-1", dec!(30), "Books", at(2025, 5, 3, 9, 0));

    let err = f.reconciler.sync_one(test_user(), p, false).unwrap_err();
    assert!(matches!(err, SyncError::Ledger(LedgerError::AccountNotFound(_))));
    assert!(f.reconciler.record(test_user(), "c-1").unwrap().is_none());
}

#[test]
fn test_other_users_account_is_rejected() {
    let f = fixture();
    let stranger = UserId::new();
    let p = payload(&f.checking, "c-x", dec!(40), "Pharmacy", at(2025, 5, 3, 9, 0));

    for force in [false, true] {
        let err = f.reconciler.sync_one(stranger, p.clone(), force).unwrap_err();
        assert_eq!(
            err,
            SyncError::Ledger(LedgerError::AccountNotOwned {
                account_id: f.checking.id,
                user_id: stranger,
            })
        );
    }
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(500));
    assert!(f.reconciler.record(stranger, "c-x").unwrap().is_none());
    assert!(transactions_with_client_id(&f.store, "c-x").is_empty());
}

#[test]
fn test_transfer_to_other_users_account_is_rejected() {
    let f = fixture();
    let theirs = seed_account_for(&f.store, UserId::new(), AccountKind::Savings, dec!(10));
    let p = SyncPayload {
        kind: TransactionType::Transfer,
        transfer_account_id: Some(theirs.id),
        ..payload(&f.checking, "c-t", dec!(25), "Move", at(2025, 5, 3, 9, 0))
    };

    let err = f.reconciler.sync_one(test_user(), p, true).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Ledger(LedgerError::AccountNotOwned { account_id, .. }) if account_id == theirs.id
    ));
    assert_eq!(balance_of(&f.store, f.checking.id), dec!(500));
    assert_eq!(balance_of(&f.store, theirs.id), dec!(10));
}

#[test]
fn test_merge_into_other_users_account_keeps_conflict() {
    let f = fixture();
    let theirs = seed_account_for(&f.store, UserId::new(), AccountKind::Checking, dec!(900));
    let big = payload(&f.checking, "c-big", dec!(150), "Hotel", at(2025, 5, 3, 10, 0));
    f.reconciler.sync_one(test_user(), big.clone(), false).unwrap();

    let merged = SyncPayload {
        account_id: theirs.id,
        ..big
    };
    let err = f
        .reconciler
        .resolve_conflict(test_user(), "c-big", "merge", Some(merged))
        .unwrap_err();

    assert!(matches!(err, SyncError::Ledger(LedgerError::AccountNotOwned { .. })));
    assert_eq!(balance_of(&f.store, theirs.id), dec!(900));
    assert_eq!(
        f.reconciler.record(test_user(), "c-big").unwrap().unwrap().status,
        SyncStatus::Conflict
    );
}

#[test]
fn test_batch_reports_each_payload() {
    let f = fixture();
    let good = payload(&f.checking, "c-good", dec!(10), "Snacks", at(2025, 5, 3, 9, 0));
    let bad = SyncPayload {
        kind: TransactionType::Transfer,
        ..payload(&f.checking, "c-bad", dec!(10), "Move", at(2025, 5, 3, 9, 0))
    };

    let items = f.reconciler.sync_batch(test_user(), vec![bad, good], false);

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].client_id, "c-bad");
    assert!(items[0].result.is_err());
    assert_eq!(items[1].client_id, "c-good");
    assert!(matches!(items[1].result, Ok(SyncOutcome::Synced { .. })));

    let summary = f.reconciler.summary(test_user()).unwrap();
    assert_eq!(summary.synced, 1);
    assert_eq!(summary.total(), 1);
}

#[test]
fn test_deleted_since_filters_by_time() {
    let f = fixture();
    let mut uow = f
        .store
        .begin([LockKey::Account(f.checking.id)].into_iter().collect())
        .unwrap();
    for (minute, id) in [(0, uuid::Uuid::from_u128(1)), (30, uuid::Uuid::from_u128(2))] {
        uow.record_tombstone(&Tombstone {
            entity: TombstoneEntity::Transaction,
            entity_id: id,
            user_id: test_user(),
            deleted_at: at(2025, 5, 2, 8, minute),
        })
        .unwrap();
    }
    uow.commit().unwrap();

    let since = f
        .reconciler
        .deleted_since(test_user(), at(2025, 5, 2, 8, 15))
        .unwrap();
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].entity_id, uuid::Uuid::from_u128(2));
}
