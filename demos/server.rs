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

//! REST API server for the wallet ledger.
//!
//! Run with: `cargo run --example server`
//!
//! The server starts with two demo wallets: `1` (alice, 1000.00) and `2`
//! (bob, 0.00). Every request names its wallet in `X-Wallet-ID`; writes also
//! carry an `X-Idempotency-Key`.
//!
//! # Example Requests
//!
//! ```bash
//! # Deposit
//! curl -X POST http://localhost:3000/v1/deposit \
//!   -H "X-Wallet-ID: 1" -H "X-Idempotency-Key: dep-1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": "100.00"}'
//!
//! # Transfer
//! curl -X POST http://localhost:3000/v1/transfer \
//!   -H "X-Wallet-ID: 1" -H "X-Idempotency-Key: tr-1" \
//!   -H "Content-Type: application/json" \
//!   -d '{"receiver_wallet_id": 2, "amount": "25.00"}'
//!
//! # Balance and history
//! curl -H "X-Wallet-ID: 2" http://localhost:3000/v1/wallet/balance
//! curl -H "X-Wallet-ID: 2" http://localhost:3000/v1/wallet/history
//! ```

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wallet_ledger::{
    Config, Context, Engine, LedgerError, MemoryIdempotencyCache, MemoryStore, Money,
    TransactionId, TransactionRecord, WalletId,
};

pub const WALLET_HEADER: &str = "x-wallet-id";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

pub type DemoEngine = Engine<MemoryStore, MemoryIdempotencyCache>;

// === Request/Response DTOs ===

/// Request body for withdrawals and deposits.
///
/// The amount is a decimal string: `{"amount": "30.00"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount: String,
}

/// Request body for transfers.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub receiver_wallet_id: u64,
    pub amount: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub wallet_id: WalletId,
    pub balance: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DemoEngine>,
    pub request_timeout: Duration,
}

// === Error Handling ===

pub enum AppError {
    Ledger(LedgerError),
    /// The blocking worker running the engine call failed.
    Internal(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidAmount(_) | LedgerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LedgerError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::DuplicateRequest(_) => StatusCode::CONFLICT,
        LedgerError::InsufficientBalance(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Ledger(err) => (
                status_for(&err),
                ErrorResponse {
                    error: err.to_string(),
                    code: err.code().to_string(),
                },
            ),
            AppError::Internal(message) => {
                error!(error = %message, "request worker failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: message,
                        code: "INTERNAL".to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn invalid_request(message: &str) -> AppError {
    AppError::Ledger(LedgerError::InvalidRequest(message.to_string()))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn wallet_id(headers: &HeaderMap) -> Result<WalletId, AppError> {
    let value = header(headers, WALLET_HEADER)
        .ok_or_else(|| invalid_request("missing X-Wallet-ID header"))?;
    value
        .parse()
        .map(WalletId)
        .map_err(|_| invalid_request("malformed X-Wallet-ID header"))
}

fn idempotency_key(headers: &HeaderMap) -> Result<String, AppError> {
    header(headers, IDEMPOTENCY_HEADER)
        .map(str::to_string)
        .ok_or_else(|| invalid_request("missing X-Idempotency-Key header"))
}

/// Cancels the request context when the handler future is dropped, e.g. on
/// client disconnect.
struct CancelOnDrop(Context);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Runs a synchronous engine call on the blocking pool under the request
/// deadline.
async fn run_blocking<T, F>(state: &AppState, call: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&DemoEngine, &Context) -> Result<T, LedgerError> + Send + 'static,
{
    let ctx = Context::with_timeout(state.request_timeout);
    let _cancel = CancelOnDrop(ctx.clone());
    let engine = Arc::clone(&state.engine);

    tokio::task::spawn_blocking(move || call(&engine, &ctx))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

// === Handlers ===

async fn ping() -> &'static str {
    "pong"
}

/// POST /v1/withdraw
async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let wallet_id = wallet_id(&headers)?;
    let key = idempotency_key(&headers)?;
    let amount: Money = request.amount.parse()?;

    let transaction_id = run_blocking(&state, move |engine, ctx| {
        engine.withdraw(ctx, &key, wallet_id, amount)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(TransactionResponse { transaction_id })))
}

/// POST /v1/deposit
async fn deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let wallet_id = wallet_id(&headers)?;
    let key = idempotency_key(&headers)?;
    let amount: Money = request.amount.parse()?;

    let transaction_id = run_blocking(&state, move |engine, ctx| {
        engine.deposit(ctx, &key, wallet_id, amount)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(TransactionResponse { transaction_id })))
}

/// POST /v1/transfer
async fn transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let sender_id = wallet_id(&headers)?;
    let key = idempotency_key(&headers)?;
    let receiver_id = WalletId(request.receiver_wallet_id);
    let amount: Money = request.amount.parse()?;

    let transaction_id = run_blocking(&state, move |engine, ctx| {
        engine.transfer(ctx, &key, sender_id, receiver_id, amount)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(TransactionResponse { transaction_id })))
}

/// GET /v1/wallet/balance
async fn balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>, AppError> {
    let wallet_id = wallet_id(&headers)?;
    let balance = run_blocking(&state, move |engine, ctx| {
        engine.query().balance(ctx, wallet_id)
    })
    .await?;
    Ok(Json(BalanceResponse { wallet_id, balance }))
}

/// GET /v1/wallet/history
async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<TransactionRecord>>, AppError> {
    let wallet_id = wallet_id(&headers)?;
    let records = run_blocking(&state, move |engine, ctx| {
        engine.query().history(ctx, wallet_id)
    })
    .await?;
    Ok(Json(records))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/withdraw", post(withdraw))
        .route("/v1/deposit", post(deposit))
        .route("/v1/transfer", post(transfer))
        .route("/v1/wallet/balance", get(balance))
        .route("/v1/wallet/history", get(history))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter.as_str().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(MemoryStore::with_config(&config.store));
    store.insert_wallet(WalletId(1), "alice", Money::new(100_000, 2))?;
    store.insert_wallet(WalletId(2), "bob", Money::new(0, 2))?;

    let engine = Engine::new(
        store,
        Arc::new(MemoryIdempotencyCache::new()),
        config.idempotency.clone(),
    );
    let state = AppState {
        engine: Arc::new(engine),
        request_timeout: config.server.request_timeout(),
    };

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "wallet ledger API listening");
    info!("endpoints: GET /v1/ping, POST /v1/withdraw, POST /v1/deposit, POST /v1/transfer, GET /v1/wallet/balance, GET /v1/wallet/history");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
