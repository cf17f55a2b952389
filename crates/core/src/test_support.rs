//! Shared fixtures for unit tests.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use fintrack_shared::types::{AccountId, UserId};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::{Account, AccountKind, NewTransaction, TransactionType};
use crate::notify::{LedgerEvent, NotificationSink, SinkError};
use crate::storage::{LedgerStore, LockKey, MemoryStore, UnitOfWork};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub fn test_user() -> UserId {
    UserId::from_uuid(Uuid::from_u128(0xF1))
}

/// Inserts an account directly, without an opening history entry.
pub fn seed_account(store: &MemoryStore, kind: AccountKind, balance: Decimal) -> Account {
    seed_account_for(store, test_user(), kind, balance)
}

/// Like [`seed_account`], owned by `user_id`.
pub fn seed_account_for(
    store: &MemoryStore,
    user_id: UserId,
    kind: AccountKind,
    balance: Decimal,
) -> Account {
    let account = Account {
        id: AccountId::new(),
        user_id,
        name: format!("{kind} account"),
        kind,
        balance,
        currency: "USD".to_string(),
        is_active: true,
    };
    let mut uow = store
        .begin([LockKey::Account(account.id)].into_iter().collect())
        .unwrap();
    uow.insert_account(&account).unwrap();
    uow.commit().unwrap();
    account
}

pub fn new_transaction(
    account_id: AccountId,
    kind: TransactionType,
    amount: Decimal,
    on: NaiveDate,
    description: &str,
) -> NewTransaction {
    NewTransaction {
        user_id: test_user(),
        account_id,
        transfer_account_id: None,
        category_id: None,
        amount,
        kind,
        date: on,
        description: description.to_string(),
        notes: None,
        reference_number: None,
        recurrence: None,
        is_cleared: true,
    }
}

pub fn balance_of(store: &MemoryStore, id: AccountId) -> Decimal {
    store.account(id).unwrap().unwrap().balance
}

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: &LedgerEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
