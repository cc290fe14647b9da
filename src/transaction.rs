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

//! Ledger entries.
//!
//! Every record carries both its [`TransactionKind`] and its [`Direction`]:
//!
//! | Operation | Entries |
//! |-----------|---------|
//! | Withdraw  | `(Withdraw, Debit)` on the wallet |
//! | Deposit   | `(Deposit, Credit)` on the wallet |
//! | Transfer  | `(Transfer, Debit)` on the sender, `(Transfer, Credit)` on the receiver |

use crate::base::{TransactionId, WalletId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Withdraw,
    Deposit,
    Transfer,
}

/// Which way an entry moves the wallet balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Balance decreases.
    Debit,
    /// Balance increases.
    Credit,
}

impl Direction {
    /// Applies `amount` to `balance` in this direction.
    ///
    /// Returns `None` on arithmetic overflow.
    pub fn apply(self, balance: Money, amount: Money) -> Option<Money> {
        match self {
            Direction::Debit => balance.checked_sub(amount),
            Direction::Credit => balance.checked_add(amount),
        }
    }
}

/// An entry that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    pub direction: Direction,
    pub amount: Money,
    pub remarks: String,
}

impl NewTransaction {
    pub fn debit(
        wallet_id: WalletId,
        kind: TransactionKind,
        amount: Money,
        remarks: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id,
            kind,
            direction: Direction::Debit,
            amount,
            remarks: remarks.into(),
        }
    }

    pub fn credit(
        wallet_id: WalletId,
        kind: TransactionKind,
        amount: Money,
        remarks: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id,
            kind,
            direction: Direction::Credit,
            amount,
            remarks: remarks.into(),
        }
    }

    /// Stamps the entry with its id and creation time.
    pub fn into_record(self, id: TransactionId, created_at: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            id,
            wallet_id: self.wallet_id,
            kind: self.kind,
            direction: self.direction,
            amount: self.amount,
            remarks: self.remarks,
            created_at,
        }
    }
}

/// An appended, immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    pub direction: Direction,
    pub amount: Money,
    pub remarks: String,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Amount with the sign of its direction: negative for debits.
    pub fn signed_amount(&self) -> Money {
        match self.direction {
            Direction::Debit => Money::ZERO - self.amount,
            Direction::Credit => self.amount,
        }
    }
}
