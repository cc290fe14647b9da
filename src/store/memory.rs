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

//! In-memory ledger store.
//!
//! Wallet rows live in a [`DashMap`]. Each row pairs its committed state with
//! the id of the unit of work holding its exclusive lock; waiters park on the
//! row's [`Condvar`] and poll their [`Context`] between wake-ups.
//!
//! Commits take the write side of a store-wide latch while they publish
//! balances, records and idempotency keys. Readers take the read side, so a
//! transfer's two rows and two records appear in one step.

use super::{LedgerStore, UnitOfWork};
use crate::base::{TransactionId, WalletId};
use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::StoreError;
use crate::money::Money;
use crate::transaction::{NewTransaction, TransactionRecord};
use crate::wallet::Wallet;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on a single condvar wait, so cancellation is noticed promptly.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

type UnitId = u64;

#[derive(Debug)]
struct RowState {
    wallet: Wallet,
    locked_by: Option<UnitId>,
}

impl RowState {
    fn assert_invariants(&self) {
        debug_assert!(
            !self.wallet.balance.is_negative(),
            "Invariant violated: wallet {} balance went negative: {}",
            self.wallet.id,
            self.wallet.balance
        );
    }
}

#[derive(Debug)]
struct WalletRow {
    state: Mutex<RowState>,
    released: Condvar,
}

impl WalletRow {
    fn new(wallet: Wallet) -> Self {
        Self {
            state: Mutex::new(RowState {
                wallet,
                locked_by: None,
            }),
            released: Condvar::new(),
        }
    }

    /// Waits until the row is free or already owned by `unit`, then takes it.
    fn acquire(
        &self,
        ctx: &Context,
        unit: UnitId,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let give_up = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match state.locked_by {
                None => {
                    state.locked_by = Some(unit);
                    return Ok(());
                }
                Some(owner) if owner == unit => return Ok(()),
                Some(_) => {}
            }

            ctx.check()?;
            let now = Instant::now();
            if now >= give_up {
                return Err(StoreError::LockTimeout(state.wallet.id));
            }
            let wake_at = give_up.min(now + LOCK_POLL_INTERVAL);
            self.released.wait_until(&mut state, wake_at);
        }
    }

    fn release(&self, unit: UnitId) {
        let mut state = self.state.lock();
        if state.locked_by == Some(unit) {
            state.locked_by = None;
            drop(state);
            self.released.notify_all();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Pending(UnitId),
    Committed,
}

#[derive(Debug)]
struct Shared {
    wallets: DashMap<WalletId, Arc<WalletRow>>,
    /// Committed records per wallet, in commit order.
    history: DashMap<WalletId, Vec<TransactionRecord>>,
    /// Unique idempotency-key table. Committed keys are never pruned, so it
    /// grows with the history.
    idempotency_keys: DashMap<String, KeyState>,
    commit_latch: RwLock<()>,
    next_wallet_id: AtomicU64,
    next_record_id: AtomicU64,
    next_unit_id: AtomicU64,
    lock_timeout: Duration,
}

/// Thread-safe in-memory [`LedgerStore`].
///
/// Cloning yields another handle to the same data.
///
/// # Example
///
/// ```
/// use wallet_ledger::{Context, LedgerStore, MemoryStore, Money, UnitOfWork};
///
/// let store = MemoryStore::new();
/// let wallet = store.create_wallet("main", Money::new(100, 0)).unwrap();
///
/// let ctx = Context::background();
/// let mut unit = store.begin_unit(&ctx).unwrap();
/// store.lock_wallet(&ctx, &mut unit, wallet.id).unwrap();
/// store.update_balance(&ctx, &mut unit, wallet.id, Money::new(90, 0)).unwrap();
/// unit.rollback().unwrap();
///
/// let after = store.find_wallet(&ctx, wallet.id).unwrap().unwrap();
/// assert_eq!(after.balance, Money::new(100, 0));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout())
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                wallets: DashMap::new(),
                history: DashMap::new(),
                idempotency_keys: DashMap::new(),
                commit_latch: RwLock::new(()),
                next_wallet_id: AtomicU64::new(1),
                next_record_id: AtomicU64::new(1),
                next_unit_id: AtomicU64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Creates a wallet with the next free id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Constraint`] for a negative opening balance.
    pub fn create_wallet(
        &self,
        name: impl Into<String>,
        opening_balance: Money,
    ) -> Result<Wallet, StoreError> {
        let name = name.into();
        loop {
            let id = WalletId(self.shared.next_wallet_id.fetch_add(1, Ordering::SeqCst));
            match self.insert_wallet(id, name.clone(), opening_balance) {
                Err(StoreError::Constraint(_)) if self.shared.wallets.contains_key(&id) => {
                    continue;
                }
                result => return result,
            }
        }
    }

    /// Creates a wallet with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Constraint`] when the id is taken or the opening balance
    /// is negative.
    pub fn insert_wallet(
        &self,
        id: WalletId,
        name: impl Into<String>,
        opening_balance: Money,
    ) -> Result<Wallet, StoreError> {
        if opening_balance.is_negative() {
            return Err(StoreError::Constraint(format!(
                "opening balance of wallet {id} cannot be negative"
            )));
        }

        let wallet = Wallet::new(id, name, opening_balance);
        match self.shared.wallets.entry(id) {
            Entry::Occupied(_) => Err(StoreError::Constraint(format!("wallet {id} already exists"))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(WalletRow::new(wallet.clone())));
                self.shared
                    .next_wallet_id
                    .fetch_max(id.0.saturating_add(1), Ordering::SeqCst);
                debug!(wallet_id = %id, balance = %opening_balance, "wallet created");
                Ok(wallet)
            }
        }
    }

    /// Marks a wallet deleted. The row and its history are kept.
    ///
    /// Waits for any unit of work holding the row. Returns `false` when the
    /// wallet does not exist or is already deleted.
    pub fn soft_delete_wallet(&self, ctx: &Context, id: WalletId) -> Result<bool, StoreError> {
        ctx.check()?;
        let Some(row) = self.row(id) else {
            return Ok(false);
        };

        let unit = self.shared.next_unit_id.fetch_add(1, Ordering::SeqCst);
        row.acquire(ctx, unit, self.shared.lock_timeout)?;
        let deleted = {
            let _latch = self.shared.commit_latch.write();
            let mut state = row.state.lock();
            if state.wallet.is_deleted() {
                false
            } else {
                let now = Utc::now();
                state.wallet.deleted_at = Some(now);
                state.wallet.updated_at = now;
                true
            }
        };
        row.release(unit);
        Ok(deleted)
    }

    /// Committed snapshots of every live wallet, ordered by id.
    pub fn wallets(&self) -> Vec<Wallet> {
        let _latch = self.shared.commit_latch.read();
        let mut wallets: Vec<Wallet> = self
            .shared
            .wallets
            .iter()
            .map(|entry| entry.value().state.lock().wallet.clone())
            .filter(|wallet| !wallet.is_deleted())
            .collect();
        wallets.sort_by_key(|wallet| wallet.id);
        wallets
    }

    /// Sum of all live wallet balances in one consistent snapshot, or `None`
    /// if the sum does not fit a [`Money`].
    pub fn total_balance(&self) -> Option<Money> {
        self.wallets()
            .iter()
            .try_fold(Money::ZERO, |total, wallet| total.checked_add(wallet.balance))
    }

    /// Number of committed transaction records across all wallets.
    pub fn record_count(&self) -> usize {
        let _latch = self.shared.commit_latch.read();
        self.shared.history.iter().map(|entry| entry.value().len()).sum()
    }

    fn row(&self, id: WalletId) -> Option<Arc<WalletRow>> {
        // Clone the Arc so no shard guard is held while waiting on the row.
        self.shared.wallets.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    fn begin_unit(&self, ctx: &Context) -> Result<MemoryUnit, StoreError> {
        ctx.check()?;
        let id = self.shared.next_unit_id.fetch_add(1, Ordering::SeqCst);
        debug!(unit = id, "unit of work started");
        Ok(MemoryUnit {
            id,
            shared: Arc::clone(&self.shared),
            locked: Vec::new(),
            balances: HashMap::new(),
            records: Vec::new(),
            keys: Vec::new(),
            finished: false,
        })
    }

    fn find_wallet(&self, ctx: &Context, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        ctx.check()?;
        let _latch = self.shared.commit_latch.read();
        let Some(row) = self.row(id) else {
            return Ok(None);
        };
        let state = row.state.lock();
        Ok((!state.wallet.is_deleted()).then(|| state.wallet.clone()))
    }

    fn lock_wallet(
        &self,
        ctx: &Context,
        unit: &mut MemoryUnit,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError> {
        ctx.check()?;
        if let Some(row) = unit.row(id) {
            let mut wallet = row.state.lock().wallet.clone();
            if let Some(staged) = unit.balances.get(&id) {
                wallet.balance = *staged;
            }
            return Ok(Some(wallet));
        }

        let Some(row) = self.row(id) else {
            return Ok(None);
        };
        row.acquire(ctx, unit.id, self.shared.lock_timeout)?;

        let wallet = row.state.lock().wallet.clone();
        if wallet.is_deleted() {
            row.release(unit.id);
            return Ok(None);
        }
        debug!(unit = unit.id, wallet_id = %id, "row locked");
        unit.locked.push((id, row));
        Ok(Some(wallet))
    }

    fn update_balance(
        &self,
        ctx: &Context,
        unit: &mut MemoryUnit,
        id: WalletId,
        new_balance: Money,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        if unit.row(id).is_none() {
            return Err(StoreError::NotLocked(id));
        }
        if new_balance.is_negative() {
            return Err(StoreError::Constraint(format!(
                "balance of wallet {id} cannot be negative"
            )));
        }
        unit.balances.insert(id, new_balance);
        Ok(())
    }

    fn append_transaction(
        &self,
        ctx: &Context,
        unit: &mut MemoryUnit,
        record: NewTransaction,
    ) -> Result<TransactionId, StoreError> {
        ctx.check()?;
        if !self.shared.wallets.contains_key(&record.wallet_id) {
            return Err(StoreError::Constraint(format!(
                "wallet {} does not exist",
                record.wallet_id
            )));
        }
        if !record.amount.is_positive() {
            return Err(StoreError::Constraint(format!(
                "record amount {} must be positive",
                record.amount
            )));
        }

        let id = TransactionId(self.shared.next_record_id.fetch_add(1, Ordering::SeqCst));
        unit.records.push(record.into_record(id, Utc::now()));
        Ok(id)
    }

    fn claim_idempotency_key(
        &self,
        ctx: &Context,
        unit: &mut MemoryUnit,
        key: &str,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        match self.shared.idempotency_keys.entry(key.to_string()) {
            Entry::Occupied(entry) if *entry.get() == KeyState::Pending(unit.id) => Ok(()),
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(key.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(KeyState::Pending(unit.id));
                unit.keys.push(key.to_string());
                Ok(())
            }
        }
    }

    fn list_transactions_by_wallet(
        &self,
        ctx: &Context,
        id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        ctx.check()?;
        let _latch = self.shared.commit_latch.read();
        // Appends to one wallet are serialized by its row lock, so each
        // history is already in id order.
        Ok(self
            .shared
            .history
            .get(&id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

/// Unit of work for [`MemoryStore`].
///
/// Holds row locks and buffers writes until [`UnitOfWork::commit`].
#[derive(Debug)]
pub struct MemoryUnit {
    id: UnitId,
    shared: Arc<Shared>,
    locked: Vec<(WalletId, Arc<WalletRow>)>,
    balances: HashMap<WalletId, Money>,
    records: Vec<TransactionRecord>,
    keys: Vec<String>,
    finished: bool,
}

impl MemoryUnit {
    fn row(&self, id: WalletId) -> Option<&Arc<WalletRow>> {
        self.locked
            .iter()
            .find(|(wallet_id, _)| *wallet_id == id)
            .map(|(_, row)| row)
    }

    fn release_rows(&mut self) {
        for (_, row) in self.locked.drain(..) {
            row.release(self.id);
        }
    }

    fn publish(&mut self) {
        let balances = std::mem::take(&mut self.balances);
        let records = std::mem::take(&mut self.records);
        let keys = std::mem::take(&mut self.keys);
        let record_count = records.len();
        let now = Utc::now();

        {
            let _latch = self.shared.commit_latch.write();
            for (id, balance) in balances {
                if let Some(row) = self.row(id) {
                    let mut state = row.state.lock();
                    state.wallet.balance = balance;
                    state.wallet.updated_at = now;
                    state.assert_invariants();
                }
            }
            for record in records {
                self.shared
                    .history
                    .entry(record.wallet_id)
                    .or_default()
                    .push(record);
            }
            for key in keys {
                self.shared.idempotency_keys.insert(key, KeyState::Committed);
            }
        }

        self.release_rows();
        self.finished = true;
        debug!(unit = self.id, records = record_count, "unit of work committed");
    }

    fn discard(&mut self) {
        let unit = self.id;
        for key in self.keys.drain(..) {
            self.shared
                .idempotency_keys
                .remove_if(&key, |_, state| *state == KeyState::Pending(unit));
        }
        self.balances.clear();
        self.records.clear();
        self.release_rows();
        self.finished = true;
        debug!(unit, "unit of work rolled back");
    }
}

impl UnitOfWork for MemoryUnit {
    fn commit(mut self) -> Result<(), StoreError> {
        self.publish();
        Ok(())
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        self.discard();
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.finished {
            self.discard();
        }
    }
}
