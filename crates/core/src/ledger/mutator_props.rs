//! Property-based tests for LedgerMutator.
//!
//! - Property 1: Balance equals opening balance plus active effects, across
//!   applies, replacements and reverts
//! - Property 2: Revert restores the pre-apply balance
//! - Property 3: Transfer symmetry across account kinds

use fintrack_shared::types::AccountId;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::mutator::LedgerMutator;
use super::types::{Account, AccountKind, LedgerEffect, TransactionType};
use crate::storage::{LedgerStore, MemoryStore, UnitOfWork};
use crate::test_support::{balance_of, date, seed_account};

/// Strategy to generate non-negative amounts (0.00 to 10,000.00).
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy to generate opening balances, negative ones included.
fn opening_strategy() -> impl Strategy<Value = Decimal> {
    (-1_000_000i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn kind_strategy() -> impl Strategy<Value = TransactionType> {
    prop_oneof![
        Just(TransactionType::Income),
        Just(TransactionType::Expense),
        Just(TransactionType::Transfer),
    ]
}

fn account_kind_strategy() -> impl Strategy<Value = AccountKind> {
    prop_oneof![
        Just(AccountKind::Checking),
        Just(AccountKind::Savings),
        Just(AccountKind::Cash),
        Just(AccountKind::CreditCard),
    ]
}

/// One step of a random ledger history.
#[derive(Debug, Clone)]
enum Op {
    Apply {
        kind: TransactionType,
        amount: Decimal,
        reversed: bool,
    },
    Replace {
        index: usize,
        kind: TransactionType,
        amount: Decimal,
        reversed: bool,
    },
    Revert(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (kind_strategy(), amount_strategy(), any::<bool>())
            .prop_map(|(kind, amount, reversed)| Op::Apply { kind, amount, reversed }),
        2 => (any::<usize>(), kind_strategy(), amount_strategy(), any::<bool>())
            .prop_map(|(index, kind, amount, reversed)| Op::Replace { index, kind, amount, reversed }),
        1 => any::<usize>().prop_map(Op::Revert),
    ]
}

/// Effect between the two accounts, flowing `second -> first` if `reversed`.
fn effect_between(
    first: &Account,
    second: &Account,
    kind: TransactionType,
    amount: Decimal,
    reversed: bool,
) -> LedgerEffect {
    let (from, to) = if reversed { (second, first) } else { (first, second) };
    LedgerEffect {
        account_id: from.id,
        transfer_account_id: (kind == TransactionType::Transfer).then_some(to.id),
        amount,
        kind,
        date: date(2025, 1, 10),
    }
}

fn run(store: &MemoryStore, effect: &LedgerEffect, revert: bool) {
    let mut uow = store.begin(effect.lock_set()).unwrap();
    if revert {
        LedgerMutator::revert(&mut uow, effect).unwrap();
    } else {
        LedgerMutator::apply(&mut uow, effect).unwrap();
    }
    uow.commit().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: after any sequence of applies, replacements and reverts,
    /// each balance equals its opening balance plus the postings of the
    /// effects still active.
    #[test]
    fn prop_balance_matches_active_effects(
        first_kind in account_kind_strategy(),
        second_kind in account_kind_strategy(),
        first_opening in opening_strategy(),
        second_opening in opening_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let store = MemoryStore::new();
        let first = seed_account(&store, first_kind, first_opening);
        let second = seed_account(&store, second_kind, second_opening);
        let mut active: Vec<LedgerEffect> = Vec::new();

        for op in ops {
            match op {
                Op::Apply { kind, amount, reversed } => {
                    let effect = effect_between(&first, &second, kind, amount, reversed);
                    run(&store, &effect, false);
                    active.push(effect);
                }
                Op::Replace { index, kind, amount, reversed } if !active.is_empty() => {
                    let slot = index % active.len();
                    let updated = effect_between(&first, &second, kind, amount, reversed);
                    let mut locks = active[slot].lock_set();
                    locks.extend(updated.lock_set());
                    let mut uow = store.begin(locks).unwrap();
                    LedgerMutator::replace(&mut uow, &active[slot], &updated).unwrap();
                    uow.commit().unwrap();
                    active[slot] = updated;
                }
                Op::Replace { .. } => {}
                Op::Revert(index) if !active.is_empty() => {
                    let effect = active.remove(index % active.len());
                    run(&store, &effect, true);
                }
                Op::Revert(_) => {}
            }
        }

        for account in [&first, &second] {
            let expected: Decimal = active
                .iter()
                .flat_map(|effect| {
                    let rule_of = |id: AccountId| if id == first.id { first_kind.balance_rule() } else { second_kind.balance_rule() };
                    LedgerMutator::postings(
                        effect,
                        rule_of(effect.account_id),
                        effect.transfer_account_id.map(rule_of),
                    )
                })
                .filter(|posting| posting.account_id == account.id)
                .map(|posting| posting.delta)
                .sum();
            prop_assert_eq!(balance_of(&store, account.id), account.balance + expected);
        }
    }

    /// Property 2: reverting an applied effect restores every touched
    /// balance exactly.
    #[test]
    fn prop_revert_restores_balances(
        from_kind in account_kind_strategy(),
        to_kind in account_kind_strategy(),
        opening in opening_strategy(),
        amount in amount_strategy(),
        kind in kind_strategy(),
    ) {
        let store = MemoryStore::new();
        let from = seed_account(&store, from_kind, opening);
        let to = seed_account(&store, to_kind, opening);
        let effect = LedgerEffect {
            account_id: from.id,
            transfer_account_id: (kind == TransactionType::Transfer).then_some(to.id),
            amount,
            kind,
            date: date(2025, 2, 1),
        };

        let mut uow = store.begin(effect.lock_set()).unwrap();
        LedgerMutator::apply(&mut uow, &effect).unwrap();
        LedgerMutator::revert(&mut uow, &effect).unwrap();
        prop_assert_eq!(uow.account(from.id).unwrap().balance, opening);
        prop_assert_eq!(uow.account(to.id).unwrap().balance, opening);
        uow.commit().unwrap();

        prop_assert_eq!(balance_of(&store, from.id), opening);
        prop_assert_eq!(balance_of(&store, to.id), opening);
    }

    /// Property 3: a transfer of A from an asset account lowers it by A and
    /// raises an asset destination by A, or lowers a credit card's debt by A.
    #[test]
    fn prop_transfer_symmetry(
        amount in amount_strategy(),
        destination_kind in account_kind_strategy(),
    ) {
        let store = MemoryStore::new();
        let from = seed_account(&store, AccountKind::Checking, Decimal::ZERO);
        let to = seed_account(&store, destination_kind, Decimal::ZERO);
        let effect = LedgerEffect {
            account_id: from.id,
            transfer_account_id: Some(to.id),
            amount,
            kind: TransactionType::Transfer,
            date: date(2025, 3, 1),
        };
        run(&store, &effect, false);

        prop_assert_eq!(balance_of(&store, from.id), -amount);
        let expected_destination = if destination_kind == AccountKind::CreditCard { -amount } else { amount };
        prop_assert_eq!(balance_of(&store, to.id), expected_destination);
    }
}
