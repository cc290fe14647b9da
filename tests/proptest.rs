// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Property-based tests for the ledger engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! operations, valid or not.

use proptest::prelude::*;
use std::sync::Arc;
use wallet_ledger::{
    Context, Direction, Engine, IdempotencyConfig, LedgerError, MemoryIdempotencyCache,
    MemoryStore, Money, Operation, TransactionId, WalletId,
};

const WALLETS: u64 = 4;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.0001 to 1000 with 4 decimal places).
fn arb_amount() -> impl Strategy<Value = Money> {
    (1i64..=10_000_000i64).prop_map(|units| Money::new(units, 4))
}

/// Generate an opening balance (0 to 500 with 2 decimal places).
fn arb_balance() -> impl Strategy<Value = Money> {
    (0i64..=50_000i64).prop_map(|cents| Money::new(cents, 2))
}

fn arb_wallet() -> impl Strategy<Value = WalletId> {
    (1..=WALLETS).prop_map(WalletId)
}

/// Any operation between the test wallets, including self transfers and
/// overdrafts.
fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (arb_wallet(), arb_amount())
            .prop_map(|(wallet_id, amount)| Operation::Withdraw { wallet_id, amount }),
        (arb_wallet(), arb_amount())
            .prop_map(|(wallet_id, amount)| Operation::Deposit { wallet_id, amount }),
        (arb_wallet(), arb_wallet(), arb_amount()).prop_map(|(sender_id, receiver_id, amount)| {
            Operation::Transfer {
                sender_id,
                receiver_id,
                amount,
            }
        }),
    ]
}

fn arb_transfer() -> impl Strategy<Value = Operation> {
    (arb_wallet(), arb_wallet(), arb_amount()).prop_map(|(sender_id, receiver_id, amount)| {
        Operation::Transfer {
            sender_id,
            receiver_id,
            amount,
        }
    })
}

type TestEngine = Engine<MemoryStore, MemoryIdempotencyCache>;

fn setup(balances: &[Money]) -> (Arc<MemoryStore>, TestEngine) {
    let store = Arc::new(MemoryStore::new());
    for (i, balance) in balances.iter().enumerate() {
        store
            .insert_wallet(WalletId(i as u64 + 1), format!("w{i}"), *balance)
            .unwrap();
    }
    let engine = Engine::new(
        Arc::clone(&store),
        Arc::new(MemoryIdempotencyCache::new()),
        IdempotencyConfig::default(),
    );
    (store, engine)
}

fn sum(amounts: impl IntoIterator<Item = Money>) -> Money {
    amounts
        .into_iter()
        .fold(Money::ZERO, |total, amount| total + amount)
}

// =============================================================================
// Balance Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Transfers never create or destroy money.
    #[test]
    fn transfers_conserve_total_balance(
        balances in prop::collection::vec(arb_balance(), WALLETS as usize),
        transfers in prop::collection::vec(arb_transfer(), 1..40),
    ) {
        let (store, engine) = setup(&balances);
        let ctx = Context::background();
        let expected = sum(balances.iter().copied());

        for (i, op) in transfers.into_iter().enumerate() {
            let _ = engine.execute(&ctx, &format!("k{i}"), op);
        }

        prop_assert_eq!(store.total_balance(), Some(expected));
    }

    /// No sequence of operations drives a balance below zero.
    #[test]
    fn balances_never_negative(
        balances in prop::collection::vec(arb_balance(), WALLETS as usize),
        ops in prop::collection::vec(arb_operation(), 1..40),
    ) {
        let (store, engine) = setup(&balances);
        let ctx = Context::background();

        for (i, op) in ops.into_iter().enumerate() {
            let _ = engine.execute(&ctx, &format!("k{i}"), op);
        }

        for wallet in store.wallets() {
            prop_assert!(!wallet.balance.is_negative(), "wallet {} went negative", wallet.id);
        }
    }

    /// The total changes by exactly the successful deposits minus the
    /// successful withdrawals.
    #[test]
    fn total_tracks_successful_operations(
        balances in prop::collection::vec(arb_balance(), WALLETS as usize),
        ops in prop::collection::vec(arb_operation(), 1..40),
    ) {
        let (store, engine) = setup(&balances);
        let ctx = Context::background();
        let mut expected = sum(balances.iter().copied());

        for (i, op) in ops.into_iter().enumerate() {
            if engine.execute(&ctx, &format!("k{i}"), op).is_ok() {
                match op {
                    Operation::Deposit { amount, .. } => expected = expected + amount,
                    Operation::Withdraw { amount, .. } => expected = expected - amount,
                    Operation::Transfer { .. } => {}
                }
            }
        }

        prop_assert_eq!(store.total_balance(), Some(expected));
    }

    /// A withdrawal larger than the balance always fails and changes nothing.
    #[test]
    fn cannot_overdraw(
        balance in arb_balance(),
        excess in arb_amount(),
    ) {
        let (store, engine) = setup(&[balance]);
        let ctx = Context::background();
        let id = WalletId(1);

        let result = engine.withdraw(&ctx, "k", id, balance + excess);

        prop_assert_eq!(result, Err(LedgerError::InsufficientBalance(id)));
        prop_assert_eq!(engine.query().balance(&ctx, id).unwrap(), balance);
        prop_assert_eq!(store.record_count(), 0);
    }
}

// =============================================================================
// History Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Replaying a wallet's history from its opening balance yields its
    /// current balance, and the history is in ascending id order.
    #[test]
    fn history_replays_to_balance(
        balances in prop::collection::vec(arb_balance(), WALLETS as usize),
        ops in prop::collection::vec(arb_operation(), 1..40),
    ) {
        let (_, engine) = setup(&balances);
        let ctx = Context::background();

        for (i, op) in ops.into_iter().enumerate() {
            let _ = engine.execute(&ctx, &format!("k{i}"), op);
        }

        let query = engine.query();
        for (i, opening) in balances.iter().enumerate() {
            let id = WalletId(i as u64 + 1);
            let records = query.history(&ctx, id).unwrap();

            let ids: Vec<TransactionId> = records.iter().map(|r| r.id).collect();
            prop_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
            prop_assert!(records.iter().all(|r| r.wallet_id == id && r.amount.is_positive()));

            let replayed = sum(records.iter().map(|r| r.signed_amount()));
            prop_assert_eq!(*opening + replayed, query.balance(&ctx, id).unwrap());
        }
    }

    /// Every committed operation writes one record per wallet it touches.
    #[test]
    fn one_record_per_balance_change(
        balances in prop::collection::vec(arb_balance(), WALLETS as usize),
        ops in prop::collection::vec(arb_operation(), 1..40),
    ) {
        let (store, engine) = setup(&balances);
        let ctx = Context::background();
        let mut expected_records = 0;
        let mut expected_debits = 0;

        for (i, op) in ops.into_iter().enumerate() {
            if engine.execute(&ctx, &format!("k{i}"), op).is_ok() {
                let (records, debits) = match op {
                    Operation::Transfer { .. } => (2, 1),
                    Operation::Withdraw { .. } => (1, 1),
                    Operation::Deposit { .. } => (1, 0),
                };
                expected_records += records;
                expected_debits += debits;
            }
        }

        prop_assert_eq!(store.record_count(), expected_records);

        let debits = (1..=WALLETS)
            .flat_map(|id| engine.query().history(&ctx, WalletId(id)).unwrap())
            .filter(|r| r.direction == Direction::Debit)
            .count();
        prop_assert_eq!(debits, expected_debits);
    }
}

// =============================================================================
// Idempotency Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Resubmitting a committed operation with the same key is rejected
    /// and leaves the ledger unchanged.
    #[test]
    fn resubmission_changes_nothing(
        balances in prop::collection::vec(arb_balance(), WALLETS as usize),
        ops in prop::collection::vec(arb_operation(), 1..20),
    ) {
        let (store, engine) = setup(&balances);
        let ctx = Context::background();

        let first: Vec<bool> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| engine.execute(&ctx, &format!("k{i}"), *op).is_ok())
            .collect();
        let wallets = store.wallets();
        let records = store.record_count();

        for (i, op) in ops.iter().enumerate().filter(|(i, _)| first[*i]) {
            let result = engine.execute(&ctx, &format!("k{i}"), *op);
            prop_assert_eq!(result, Err(LedgerError::DuplicateRequest(format!("k{i}"))));
        }

        let balances_before: Vec<Money> = wallets.iter().map(|w| w.balance).collect();
        let balances_after: Vec<Money> = store.wallets().iter().map(|w| w.balance).collect();
        prop_assert_eq!(balances_before, balances_after);
        prop_assert_eq!(store.record_count(), records);
    }
}

// =============================================================================
// Money Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Amounts with more than four decimal places are rejected, never rounded.
    #[test]
    fn excess_precision_is_rejected(
        whole in 0u32..1_000_000,
        fraction in 10_000u32..100_000,
    ) {
        let text = format!("{whole}.{fraction:05}");
        let parsed = text.parse::<Money>();
        prop_assert!(matches!(parsed, Err(LedgerError::InvalidAmount(_))), "{} parsed", text);
    }
}
