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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wallet_ledger::{
    Config, Context, Engine, IdempotencyCache, IdempotencyPolicy, LedgerError,
    MemoryIdempotencyCache, MemoryStore, Money, Operation, WalletId,
};

/// Wallet Ledger - Replay wallet operations from CSV files
///
/// Loads opening wallets, applies every operation through the ledger engine
/// in file order and writes the final balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Replays withdraw, deposit and transfer CSVs against a wallet ledger", long_about = None)]
struct Args {
    /// Path to CSV file with opening wallets
    ///
    /// Expected format: wallet,name,balance
    #[arg(value_name = "WALLETS")]
    wallets: PathBuf,

    /// Path to CSV file with operations
    ///
    /// Expected format: type,key,wallet,receiver,amount
    /// Example: cargo run -- wallets.csv operations.csv > balances.csv
    #[arg(value_name = "OPERATIONS")]
    operations: PathBuf,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Idempotency policy: strict or best-effort
    #[arg(long)]
    policy: Option<IdempotencyPolicy>,

    /// Longest wait for a wallet row lock, in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Log filter directives, e.g. "wallet_ledger=debug"
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn load_config(&self) -> Result<Config, wallet_ledger::ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;

        if let Some(policy) = self.policy {
            config.idempotency.policy = policy;
        }
        if let Some(timeout) = self.lock_timeout_ms {
            config.store.lock_timeout_ms = timeout;
        }
        if let Some(filter) = &self.log_filter {
            config.log_filter = filter.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open(path: &Path) -> BufReader<File> {
    match File::open(path) {
        Ok(f) => BufReader::new(f),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to open file");
            process::exit(1);
        }
    }
}

fn main() {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };
    init_tracing(&config.log_filter);

    let store = Arc::new(MemoryStore::with_config(&config.store));
    let engine = Engine::new(
        Arc::clone(&store),
        Arc::new(MemoryIdempotencyCache::new()),
        config.idempotency.clone(),
    );

    if let Err(e) = load_wallets(&store, open(&args.wallets)) {
        error!(error = %e, "failed to load wallets");
        process::exit(1);
    }

    let ctx = Context::background();
    match replay_operations(&engine, &ctx, open(&args.operations)) {
        Ok(summary) => info!(
            applied = summary.applied,
            rejected = summary.rejected,
            skipped = summary.skipped,
            "replay finished"
        ),
        Err(e) => {
            error!(error = %e, "failed to read operations");
            process::exit(1);
        }
    }

    if let Err(e) = write_wallets(&store, std::io::stdout()) {
        error!(error = %e, "failed to write balances");
        process::exit(1);
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Raw CSV record of the wallets file.
///
/// Fields: `wallet, name, balance`
#[derive(Debug, Deserialize)]
struct WalletRecord {
    wallet: u64,
    name: String,
    balance: String,
}

/// Loads opening wallets into the store.
///
/// Rows that are malformed, carry an invalid balance or reuse an id are
/// skipped and logged. Returns the number of wallets created.
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn load_wallets<R: Read>(store: &MemoryStore, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = csv_reader(reader);
    let mut loaded = 0;

    for result in rdr.deserialize::<WalletRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed wallet row");
                continue;
            }
        };
        let balance: Money = match record.balance.parse() {
            Ok(balance) => balance,
            Err(e) => {
                warn!(wallet = record.wallet, error = %e, "skipping wallet with invalid balance");
                continue;
            }
        };
        match store.insert_wallet(WalletId(record.wallet), record.name, balance) {
            Ok(_) => loaded += 1,
            Err(e) => warn!(wallet = record.wallet, error = %e, "skipping wallet"),
        }
    }

    Ok(loaded)
}

/// Raw CSV record of the operations file.
///
/// Fields: `type, key, wallet, receiver, amount`
#[derive(Debug, Deserialize)]
struct OperationRecord {
    #[serde(rename = "type")]
    op_type: String,
    key: String,
    wallet: u64,
    #[serde(deserialize_with = "csv::invalid_option")]
    receiver: Option<u64>,
    amount: String,
}

impl OperationRecord {
    /// Converts the CSV record into an engine operation.
    fn to_operation(&self) -> Result<Operation, LedgerError> {
        let wallet_id = WalletId(self.wallet);
        let amount: Money = self.amount.parse()?;

        match self.op_type.to_lowercase().as_str() {
            "withdraw" => Ok(Operation::Withdraw { wallet_id, amount }),
            "deposit" => Ok(Operation::Deposit { wallet_id, amount }),
            "transfer" => {
                let receiver = self.receiver.ok_or_else(|| {
                    LedgerError::InvalidRequest("transfer requires a receiver".to_string())
                })?;
                Ok(Operation::Transfer {
                    sender_id: wallet_id,
                    receiver_id: WalletId(receiver),
                    amount,
                })
            }
            other => Err(LedgerError::InvalidRequest(format!(
                "unknown operation type {other:?}"
            ))),
        }
    }
}

/// Counts of what happened to each operations row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Replays operations from a CSV reader through the engine, in file order.
///
/// This function streams the input, so arbitrarily large files are fine.
/// Malformed rows are skipped; operations the engine rejects are logged and
/// counted but don't stop processing.
///
/// # CSV Format
///
/// Expected columns: `type, key, wallet, receiver, amount`
/// - `type`: withdraw, deposit or transfer
/// - `key`: Idempotency key
/// - `wallet`: Wallet id (the sender for transfers)
/// - `receiver`: Receiving wallet id (transfers only, empty otherwise)
/// - `amount`: Decimal amount with at most four decimal places
///
/// # Example
///
/// ```csv
/// type,key,wallet,receiver,amount
/// deposit,k1,1,,100.0
/// transfer,k2,1,2,40.0
/// withdraw,k3,2,,10.0
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn replay_operations<R: Read, C: IdempotencyCache>(
    engine: &Engine<MemoryStore, C>,
    ctx: &Context,
    reader: R,
) -> Result<ReplaySummary, csv::Error> {
    let mut rdr = csv_reader(reader);
    let mut summary = ReplaySummary::default();

    for result in rdr.deserialize::<OperationRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed operation row");
                summary.skipped += 1;
                continue;
            }
        };

        let operation = match record.to_operation() {
            Ok(operation) => operation,
            Err(e) => {
                warn!(key = %record.key, error = %e, "skipping invalid operation");
                summary.skipped += 1;
                continue;
            }
        };

        match engine.execute(ctx, &record.key, operation) {
            Ok(transaction_id) => {
                debug!(key = %record.key, transaction_id = %transaction_id, "applied");
                summary.applied += 1;
            }
            Err(e) => {
                warn!(key = %record.key, code = e.code(), error = %e, "operation rejected");
                summary.rejected += 1;
            }
        }
    }

    Ok(summary)
}

/// Output row of the balances file.
#[derive(Debug, Serialize)]
struct BalanceRecord {
    wallet: WalletId,
    name: String,
    balance: Money,
}

/// Writes live wallet balances to a CSV writer, ordered by wallet id.
///
/// # CSV Format
///
/// Columns: `wallet, name, balance`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_wallets<W: Write>(store: &MemoryStore, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for wallet in store.wallets() {
        wtr.serialize(BalanceRecord {
            wallet: wallet.id,
            name: wallet.name,
            balance: wallet.balance,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
