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

//! # Wallet Ledger
//!
//! This library provides a wallet ledger: balances that change only through
//! withdrawals, deposits and transfers, each recorded as an append-only
//! transaction entry in the same atomic unit of work as the balance change.
//!
//! ## Core Components
//!
//! - [`Engine`]: Validates and applies balance-changing operations
//! - [`WalletQuery`]: Read-only balance and history lookups
//! - [`LedgerStore`]: Persistence contract with row locks and units of work
//! - [`IdempotencyCache`]: Expiring record of recently seen request keys
//! - [`Money`]: Exact decimal amounts
//! - [`LedgerError`]: Failure taxonomy shared by every operation
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger::{
//!     Context, Engine, IdempotencyConfig, MemoryIdempotencyCache, MemoryStore, Money,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! let alice = store.create_wallet("alice", Money::new(100, 0)).unwrap();
//! let bob = store.create_wallet("bob", Money::ZERO).unwrap();
//!
//! let engine = Engine::new(
//!     Arc::clone(&store),
//!     Arc::new(MemoryIdempotencyCache::new()),
//!     IdempotencyConfig::default(),
//! );
//!
//! let ctx = Context::background();
//! engine.transfer(&ctx, "req-1", alice.id, bob.id, Money::new(40, 0)).unwrap();
//!
//! let query = engine.query();
//! assert_eq!(query.balance(&ctx, alice.id).unwrap(), Money::new(60, 0));
//! assert_eq!(query.balance(&ctx, bob.id).unwrap(), Money::new(40, 0));
//! assert_eq!(query.history(&ctx, bob.id).unwrap().len(), 1);
//! ```
//!
//! ## Thread Safety
//!
//! The engine, query service and in-memory store are `Send + Sync`. Operations
//! on different wallets run in parallel; operations on the same wallet are
//! serialized by row locks taken in ascending wallet id order.

mod base;
pub mod config;
mod context;
mod engine;
pub mod error;
mod idempotency;
mod money;
mod query;
pub mod store;
mod transaction;
mod wallet;

pub use base::{TransactionId, WalletId};
pub use config::{Config, ConfigError, IdempotencyConfig, IdempotencyPolicy, ServerConfig, StoreConfig};
pub use context::{Context, Interrupted};
pub use engine::{Engine, Operation};
pub use error::{CacheError, LedgerError, StoreError};
pub use idempotency::{IdempotencyCache, MemoryIdempotencyCache};
pub use money::Money;
pub use query::WalletQuery;
pub use store::{LedgerStore, MemoryStore, MemoryUnit, UnitOfWork};
pub use transaction::{Direction, NewTransaction, TransactionKind, TransactionRecord};
pub use wallet::Wallet;
