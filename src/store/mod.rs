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

//! Persistence contract consumed by the engine.
//!
//! A store exposes committed reads plus a set of writes scoped to a
//! [`UnitOfWork`]. Writes made through a unit become visible together when it
//! commits and vanish when it rolls back or is dropped.
//!
//! Implementations must provide:
//!
//! - Exclusive row locks from [`LedgerStore::lock_wallet`] held until the
//!   unit finishes. Two units never hold the same wallet at once.
//! - Lock waits bounded by a store timeout and by the caller's [`Context`].
//! - A uniqueness constraint behind [`LedgerStore::claim_idempotency_key`].
//! - Snapshot reads: a commit touching several wallets is observed entirely
//!   or not at all.

mod memory;

pub use memory::{MemoryStore, MemoryUnit};

use crate::base::{TransactionId, WalletId};
use crate::context::Context;
use crate::error::StoreError;
use crate::money::Money;
use crate::transaction::{NewTransaction, TransactionRecord};
use crate::wallet::Wallet;

/// An atomic unit of work.
///
/// Dropping a unit that was neither committed nor rolled back rolls it back.
pub trait UnitOfWork: Send {
    /// Makes every write of the unit durable and visible, then releases its
    /// row locks.
    fn commit(self) -> Result<(), StoreError>;

    /// Discards every write of the unit and releases its row locks.
    fn rollback(self) -> Result<(), StoreError>;
}

pub trait LedgerStore: Send + Sync {
    type Unit: UnitOfWork;

    fn begin_unit(&self, ctx: &Context) -> Result<Self::Unit, StoreError>;

    /// Reads the last committed state of a wallet.
    ///
    /// Soft-deleted wallets read as `None`.
    fn find_wallet(&self, ctx: &Context, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    /// Acquires the wallet row for `unit` and returns it as the unit sees it,
    /// including the unit's own uncommitted balance.
    ///
    /// Blocks while another unit holds the row.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockTimeout`] when the store timeout elapses first, or
    /// [`StoreError::Interrupted`] when the context is cancelled or expires.
    fn lock_wallet(
        &self,
        ctx: &Context,
        unit: &mut Self::Unit,
        id: WalletId,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Stages a new balance for a wallet locked by `unit`.
    fn update_balance(
        &self,
        ctx: &Context,
        unit: &mut Self::Unit,
        id: WalletId,
        new_balance: Money,
    ) -> Result<(), StoreError>;

    /// Stages a ledger entry and returns its assigned id.
    fn append_transaction(
        &self,
        ctx: &Context,
        unit: &mut Self::Unit,
        record: NewTransaction,
    ) -> Result<TransactionId, StoreError>;

    /// Inserts `key` into the unique idempotency-key table within `unit`.
    ///
    /// Committed keys are permanent, like the records they guard: a key keeps
    /// blocking resubmission after the cache's TTL has passed.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] when the key is committed or claimed by
    /// another unit in flight.
    fn claim_idempotency_key(
        &self,
        ctx: &Context,
        unit: &mut Self::Unit,
        key: &str,
    ) -> Result<(), StoreError>;

    /// Committed records of a wallet in commit order.
    fn list_transactions_by_wallet(
        &self,
        ctx: &Context,
        id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}
