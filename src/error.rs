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

//! Error types for the ledger engine, the store and the idempotency cache.

use crate::base::WalletId;
use crate::context::Interrupted;
use thiserror::Error;

/// Errors surfaced by the engine and the query service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is malformed, zero, negative or overflows
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Debit would take the wallet below zero
    #[error("insufficient balance in wallet {0}")]
    InsufficientBalance(WalletId),

    /// Referenced wallet does not exist
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    /// Idempotency key was already used within its TTL
    #[error("duplicate request for idempotency key {0:?}")]
    DuplicateRequest(String),

    /// Request is structurally unusable (empty key, self transfer)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The store failed; nothing was committed
    #[error("persistence failure: {0}")]
    PersistenceFailure(StoreError),
}

impl LedgerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            LedgerError::InvalidRequest(_) => "INVALID_REQUEST",
            LedgerError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
        }
    }

    /// `true` when retrying the same request unchanged cannot succeed.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::PersistenceFailure(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(key) => LedgerError::DuplicateRequest(key),
            other => LedgerError::PersistenceFailure(other),
        }
    }
}

impl From<Interrupted> for LedgerError {
    fn from(err: Interrupted) -> Self {
        LedgerError::PersistenceFailure(StoreError::Interrupted(err))
    }
}

/// Errors raised by a [`LedgerStore`](crate::store::LedgerStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Row lock not acquired within the store's lock timeout
    #[error("timed out waiting for the lock on wallet {0}")]
    LockTimeout(WalletId),

    /// Caller cancelled or ran out of time
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// Idempotency key violates the uniqueness constraint
    #[error("idempotency key {0:?} already claimed")]
    DuplicateKey(String),

    /// Write attempted on a row the unit of work does not hold
    #[error("wallet {0} is not locked by this unit of work")]
    NotLocked(WalletId),

    /// Write rejected by a store constraint
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Backend unreachable or failing
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by an [`IdempotencyCache`](crate::idempotency::IdempotencyCache).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("idempotency cache unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidAmount("must be positive".into()).to_string(),
            "invalid amount: must be positive"
        );
        assert_eq!(
            LedgerError::InsufficientBalance(WalletId(1)).to_string(),
            "insufficient balance in wallet 1"
        );
        assert_eq!(
            LedgerError::WalletNotFound(WalletId(9)).to_string(),
            "wallet 9 not found"
        );
        assert_eq!(
            LedgerError::DuplicateRequest("k1".into()).to_string(),
            "duplicate request for idempotency key \"k1\""
        );
        assert_eq!(
            LedgerError::PersistenceFailure(StoreError::LockTimeout(WalletId(3))).to_string(),
            "persistence failure: timed out waiting for the lock on wallet 3"
        );
        assert_eq!(
            StoreError::Interrupted(Interrupted::Cancelled).to_string(),
            "operation cancelled by caller"
        );
    }

    #[test]
    fn duplicate_key_maps_to_duplicate_request() {
        let err: LedgerError = StoreError::DuplicateKey("k1".into()).into();
        assert_eq!(err, LedgerError::DuplicateRequest("k1".into()));
    }

    #[test]
    fn other_store_errors_map_to_persistence_failure() {
        let err: LedgerError = StoreError::Unavailable("down".into()).into();
        assert_eq!(
            err,
            LedgerError::PersistenceFailure(StoreError::Unavailable("down".into()))
        );
        assert!(!err.is_client_error());

        let err: LedgerError = Interrupted::DeadlineExceeded.into();
        assert_eq!(err.code(), "PERSISTENCE_FAILURE");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::InvalidAmount(String::new()).code(), "INVALID_AMOUNT");
        assert_eq!(
            LedgerError::InsufficientBalance(WalletId(1)).code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(LedgerError::WalletNotFound(WalletId(1)).code(), "WALLET_NOT_FOUND");
        assert_eq!(LedgerError::DuplicateRequest(String::new()).code(), "DUPLICATE_REQUEST");
        assert_eq!(LedgerError::InvalidRequest(String::new()).code(), "INVALID_REQUEST");
    }
}
