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

//! Transaction processing engine.
//!
//! The [`Engine`] is the only writer of wallet balances and the only creator
//! of transaction records. Every [`Operation`] goes through the same steps:
//!
//! 1. Reject keys already marked in the idempotency cache.
//! 2. Validate against committed state (wallet exists, amount positive,
//!    balance covers the debit). Nothing is locked or written yet.
//! 3. Mark the key in the cache. A mark created by a racing submission
//!    rejects this one as a duplicate.
//! 4. In one unit of work: claim the key (strict policy), lock the wallet
//!    rows, re-check the balance against the locked rows, append the entries
//!    and stage the new balances.
//! 5. Commit, or roll back and clear the cache mark (only if this submission
//!    created it) so the caller can retry with the same key.
//!
//! # Thread Safety
//!
//! The engine is `Send + Sync` when its store and cache are. Callers share it
//! behind an [`Arc`] and invoke it from as many threads as they like; all
//! serialization happens on the store's row locks.

use crate::base::{TransactionId, WalletId};
use crate::config::{IdempotencyConfig, IdempotencyPolicy};
use crate::context::Context;
use crate::error::LedgerError;
use crate::idempotency::IdempotencyCache;
use crate::money::Money;
use crate::query::WalletQuery;
use crate::store::{LedgerStore, UnitOfWork};
use crate::transaction::{NewTransaction, TransactionKind};
use crate::wallet::Wallet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A balance-changing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Withdraw {
        wallet_id: WalletId,
        amount: Money,
    },
    Deposit {
        wallet_id: WalletId,
        amount: Money,
    },
    Transfer {
        sender_id: WalletId,
        receiver_id: WalletId,
        amount: Money,
    },
}

impl Operation {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Withdraw { .. } => TransactionKind::Withdraw,
            Self::Deposit { .. } => TransactionKind::Deposit,
            Self::Transfer { .. } => TransactionKind::Transfer,
        }
    }

    /// The wallet the caller acts on (the sender for transfers).
    pub fn wallet_id(&self) -> WalletId {
        match self {
            Self::Withdraw { wallet_id, .. } => *wallet_id,
            Self::Deposit { wallet_id, .. } => *wallet_id,
            Self::Transfer { sender_id, .. } => *sender_id,
        }
    }

    pub fn amount(&self) -> Money {
        match self {
            Self::Withdraw { amount, .. } => *amount,
            Self::Deposit { amount, .. } => *amount,
            Self::Transfer { amount, .. } => *amount,
        }
    }
}

fn ensure_positive(amount: Money) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(format!(
            "{amount} is not greater than zero"
        )))
    }
}

fn ensure_covers(wallet: &Wallet, amount: Money) -> Result<(), LedgerError> {
    if wallet.can_cover(amount) {
        Ok(())
    } else {
        Err(LedgerError::InsufficientBalance(wallet.id))
    }
}

/// Ledger transaction engine.
///
/// # Invariants
///
/// - A committed operation appends exactly one record per balance it changes,
///   in the same unit of work.
/// - No committed balance is negative.
/// - Under [`IdempotencyPolicy::Strict`] at most one operation per key ever
///   commits.
/// - A transfer commits both legs or neither.
pub struct Engine<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    config: IdempotencyConfig,
}

impl<S, C> Engine<S, C>
where
    S: LedgerStore,
    C: IdempotencyCache,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, config: IdempotencyConfig) -> Self {
        Engine {
            store,
            cache,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Read-only view over the same store.
    pub fn query(&self) -> WalletQuery<S> {
        WalletQuery::new(Arc::clone(&self.store))
    }

    pub fn withdraw(
        &self,
        ctx: &Context,
        idempotency_key: &str,
        wallet_id: WalletId,
        amount: Money,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(ctx, idempotency_key, Operation::Withdraw { wallet_id, amount })
    }

    pub fn deposit(
        &self,
        ctx: &Context,
        idempotency_key: &str,
        wallet_id: WalletId,
        amount: Money,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(ctx, idempotency_key, Operation::Deposit { wallet_id, amount })
    }

    /// Moves `amount` from `sender_id` to `receiver_id`. Returns the id of the
    /// sender's debit record.
    pub fn transfer(
        &self,
        ctx: &Context,
        idempotency_key: &str,
        sender_id: WalletId,
        receiver_id: WalletId,
        amount: Money,
    ) -> Result<TransactionId, LedgerError> {
        self.execute(
            ctx,
            idempotency_key,
            Operation::Transfer {
                sender_id,
                receiver_id,
                amount,
            },
        )
    }

    /// Validates and atomically applies an operation.
    ///
    /// Returns the id of the record written for the caller's wallet.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRequest`] - Empty key or transfer to self.
    /// - [`LedgerError::DuplicateRequest`] - Key already used.
    /// - [`LedgerError::WalletNotFound`] - Wallet, sender or receiver missing.
    /// - [`LedgerError::InvalidAmount`] - Amount not positive.
    /// - [`LedgerError::InsufficientBalance`] - Debit exceeds the balance.
    /// - [`LedgerError::PersistenceFailure`] - Store failure, lock timeout,
    ///   cancellation or deadline. Nothing was committed.
    pub fn execute(
        &self,
        ctx: &Context,
        idempotency_key: &str,
        operation: Operation,
    ) -> Result<TransactionId, LedgerError> {
        if idempotency_key.trim().is_empty() {
            return Err(LedgerError::InvalidRequest(
                "idempotency key is required".to_string(),
            ));
        }
        if self.seen(ctx, idempotency_key) {
            warn!(key = idempotency_key, "duplicate request rejected by cache");
            return Err(LedgerError::DuplicateRequest(idempotency_key.to_string()));
        }

        self.validate(ctx, &operation)?;
        let owns_mark = self.mark(ctx, idempotency_key)?;

        let result = self.apply(ctx, idempotency_key, &operation);
        match &result {
            Ok(transaction_id) => info!(
                key = idempotency_key,
                kind = ?operation.kind(),
                wallet_id = %operation.wallet_id(),
                amount = %operation.amount(),
                transaction_id = %transaction_id,
                "operation committed"
            ),
            Err(LedgerError::DuplicateRequest(_)) => {
                warn!(key = idempotency_key, "duplicate request rejected by store");
            }
            Err(err) => {
                warn!(
                    key = idempotency_key,
                    kind = ?operation.kind(),
                    wallet_id = %operation.wallet_id(),
                    error = %err,
                    "operation rolled back"
                );
                if owns_mark {
                    self.unmark(idempotency_key);
                }
            }
        }
        result
    }

    fn seen(&self, ctx: &Context, key: &str) -> bool {
        match self.cache.exists(ctx, key) {
            Ok(seen) => seen,
            Err(err) => {
                warn!(key, error = %err, "idempotency cache lookup failed");
                false
            }
        }
    }

    /// Returns whether this request created the mark.
    fn mark(&self, ctx: &Context, key: &str) -> Result<bool, LedgerError> {
        match self.cache.set(ctx, key, self.config.ttl()) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(key, "duplicate request lost the race to mark its key");
                Err(LedgerError::DuplicateRequest(key.to_string()))
            }
            Err(err) => {
                warn!(key, error = %err, "failed to mark idempotency key");
                Ok(false)
            }
        }
    }

    fn unmark(&self, key: &str) {
        // The caller may already be cancelled; the mark must still go.
        if let Err(err) = self.cache.remove(&Context::background(), key) {
            warn!(key, error = %err, "failed to clear idempotency key");
        }
    }

    fn find_wallet(&self, ctx: &Context, id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .find_wallet(ctx, id)?
            .ok_or(LedgerError::WalletNotFound(id))
    }

    /// Checks against committed state, before any lock is taken.
    fn validate(&self, ctx: &Context, operation: &Operation) -> Result<(), LedgerError> {
        match *operation {
            Operation::Withdraw { wallet_id, amount } => {
                let wallet = self.find_wallet(ctx, wallet_id)?;
                ensure_positive(amount)?;
                ensure_covers(&wallet, amount)
            }
            Operation::Deposit { wallet_id, amount } => {
                ensure_positive(amount)?;
                self.find_wallet(ctx, wallet_id).map(|_| ())
            }
            Operation::Transfer {
                sender_id,
                receiver_id,
                amount,
            } => {
                if sender_id == receiver_id {
                    return Err(LedgerError::InvalidRequest(format!(
                        "cannot transfer from wallet {sender_id} to itself"
                    )));
                }
                let sender = self.find_wallet(ctx, sender_id)?;
                ensure_positive(amount)?;
                ensure_covers(&sender, amount)
            }
        }
    }

    /// Runs the operation in a unit of work that commits on success and rolls
    /// back on any error.
    fn apply(
        &self,
        ctx: &Context,
        key: &str,
        operation: &Operation,
    ) -> Result<TransactionId, LedgerError> {
        let mut unit = self.store.begin_unit(ctx)?;
        let outcome = self
            .apply_in_unit(ctx, &mut unit, key, operation)
            .and_then(|transaction_id| {
                ctx.check()?;
                Ok(transaction_id)
            });

        match outcome {
            Ok(transaction_id) => {
                unit.commit()?;
                Ok(transaction_id)
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback() {
                    warn!(key, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn apply_in_unit(
        &self,
        ctx: &Context,
        unit: &mut S::Unit,
        key: &str,
        operation: &Operation,
    ) -> Result<TransactionId, LedgerError> {
        if self.config.policy == IdempotencyPolicy::Strict {
            self.store.claim_idempotency_key(ctx, unit, key)?;
        }

        match *operation {
            Operation::Withdraw { wallet_id, amount } => {
                let wallet = self.lock_wallet(ctx, unit, wallet_id)?;
                ensure_covers(&wallet, amount)?;
                self.post(
                    ctx,
                    unit,
                    &wallet,
                    NewTransaction::debit(wallet_id, TransactionKind::Withdraw, amount, "withdraw"),
                )
            }
            Operation::Deposit { wallet_id, amount } => {
                let wallet = self.lock_wallet(ctx, unit, wallet_id)?;
                self.post(
                    ctx,
                    unit,
                    &wallet,
                    NewTransaction::credit(wallet_id, TransactionKind::Deposit, amount, "deposit"),
                )
            }
            Operation::Transfer {
                sender_id,
                receiver_id,
                amount,
            } => {
                // Rows are always taken in ascending id order so opposite
                // transfers between one pair of wallets cannot deadlock.
                let (sender, receiver) = if sender_id < receiver_id {
                    let sender = self.store.lock_wallet(ctx, unit, sender_id)?;
                    let receiver = self.store.lock_wallet(ctx, unit, receiver_id)?;
                    (sender, receiver)
                } else {
                    let receiver = self.store.lock_wallet(ctx, unit, receiver_id)?;
                    let sender = self.store.lock_wallet(ctx, unit, sender_id)?;
                    (sender, receiver)
                };

                let sender = sender.ok_or(LedgerError::WalletNotFound(sender_id))?;
                ensure_covers(&sender, amount)?;
                let transaction_id = self.post(
                    ctx,
                    unit,
                    &sender,
                    NewTransaction::debit(sender_id, TransactionKind::Transfer, amount, "send"),
                )?;

                let receiver = receiver.ok_or(LedgerError::WalletNotFound(receiver_id))?;
                self.post(
                    ctx,
                    unit,
                    &receiver,
                    NewTransaction::credit(receiver_id, TransactionKind::Transfer, amount, "receive"),
                )?;
                Ok(transaction_id)
            }
        }
    }

    fn lock_wallet(
        &self,
        ctx: &Context,
        unit: &mut S::Unit,
        id: WalletId,
    ) -> Result<Wallet, LedgerError> {
        self.store
            .lock_wallet(ctx, unit, id)?
            .ok_or(LedgerError::WalletNotFound(id))
    }

    /// Appends one entry and stages the balance it produces.
    fn post(
        &self,
        ctx: &Context,
        unit: &mut S::Unit,
        wallet: &Wallet,
        entry: NewTransaction,
    ) -> Result<TransactionId, LedgerError> {
        let new_balance = entry
            .direction
            .apply(wallet.balance, entry.amount)
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "{} overflows the balance of wallet {}",
                    entry.amount, wallet.id
                ))
            })?;

        let transaction_id = self.store.append_transaction(ctx, unit, entry)?;
        self.store.update_balance(ctx, unit, wallet.id, new_balance)?;
        debug!(
            wallet_id = %wallet.id,
            transaction_id = %transaction_id,
            balance = %new_balance,
            "entry posted"
        );
        Ok(transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::MemoryIdempotencyCache;
    use crate::store::MemoryStore;

    fn money(text: &str) -> Money {
        text.parse().unwrap()
    }

    fn engine() -> Engine<MemoryStore, MemoryIdempotencyCache> {
        Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryIdempotencyCache::new()),
            IdempotencyConfig::default(),
        )
    }

    #[test]
    fn operation_accessors() {
        let op = Operation::Transfer {
            sender_id: WalletId(1),
            receiver_id: WalletId(2),
            amount: money("5"),
        };
        assert_eq!(op.kind(), TransactionKind::Transfer);
        assert_eq!(op.wallet_id(), WalletId(1));
        assert_eq!(op.amount(), money("5"));
    }

    #[test]
    fn validation_failure_leaves_key_unmarked() {
        let engine = engine();
        let ctx = Context::background();
        let wallet = engine.store().create_wallet("w", money("10")).unwrap();

        let result = engine.withdraw(&ctx, "k", wallet.id, money("50"));
        assert_eq!(result, Err(LedgerError::InsufficientBalance(wallet.id)));
        assert_eq!(engine.cache().exists(&ctx, "k"), Ok(false));
    }

    #[test]
    fn success_marks_key() {
        let engine = engine();
        let ctx = Context::background();
        let wallet = engine.store().create_wallet("w", money("10")).unwrap();

        engine.deposit(&ctx, "k", wallet.id, money("1")).unwrap();
        assert_eq!(engine.cache().exists(&ctx, "k"), Ok(true));
    }

    #[test]
    fn blank_key_is_rejected() {
        let engine = engine();
        let ctx = Context::background();
        let result = engine.deposit(&ctx, "  ", WalletId(1), money("1"));
        assert!(matches!(result, Err(LedgerError::InvalidRequest(_))));
    }
}
