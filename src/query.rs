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

//! Read-only wallet queries.

use crate::base::WalletId;
use crate::context::Context;
use crate::error::LedgerError;
use crate::money::Money;
use crate::store::LedgerStore;
use crate::transaction::TransactionRecord;
use crate::wallet::Wallet;
use std::sync::Arc;

/// Balance and history lookups over committed state.
///
/// Never takes row locks, so queries do not wait on in-flight operations.
pub struct WalletQuery<S> {
    store: Arc<S>,
}

impl<S> Clone for WalletQuery<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> WalletQuery<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn wallet(&self, ctx: &Context, id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .find_wallet(ctx, id)?
            .ok_or(LedgerError::WalletNotFound(id))
    }

    /// Last committed balance of a wallet.
    pub fn balance(&self, ctx: &Context, id: WalletId) -> Result<Money, LedgerError> {
        self.wallet(ctx, id).map(|wallet| wallet.balance)
    }

    /// Committed records of a wallet, oldest first by record id.
    ///
    /// Ids are assigned while the wallet's row is locked, so they follow commit
    /// order even if the wall clock behind `created_at` steps backwards.
    ///
    /// A soft-deleted wallet still returns its history. An id with neither a
    /// live wallet nor any records is [`LedgerError::WalletNotFound`].
    pub fn history(
        &self,
        ctx: &Context,
        id: WalletId,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let mut records = self.store.list_transactions_by_wallet(ctx, id)?;
        if records.is_empty() && self.store.find_wallet(ctx, id)?.is_none() {
            return Err(LedgerError::WalletNotFound(id));
        }
        records.sort_by_key(|record| record.id);
        Ok(records)
    }
}
