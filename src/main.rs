use std::{
    fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use water_ledger::{
    ledger::BatchId, AppConfig, Call, Ledger, Outcome, Request, SnapshotStore,
};

//==================== Аргументы ====================//

#[derive(Parser)]
#[command(name = "water-ledger")]
#[command(about = "Capped water-trading ledger: reserve, balances, listings, fees", long_about = None)]
struct Cli {
    /// TOML config (owner, initial terms, underflow policy)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ledger snapshot file
    #[arg(long, global = true, default_value = "water-ledger.json")]
    state: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh ledger from the config
    Init {
        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },
    /// Owner: set the unit price used for refunds
    SetUnitPrice {
        #[arg(long)]
        caller: String,
        price: u64,
    },
    /// Owner: set the trading fee percentage
    SetFeePercent {
        #[arg(long)]
        caller: String,
        percent: u64,
    },
    /// Owner: set the refund percentage
    SetRefundPercent {
        #[arg(long)]
        caller: String,
        percent: u64,
    },
    /// Owner: set the reserve cap
    SetReserveCap {
        #[arg(long)]
        caller: String,
        limit: u64,
    },
    /// Owner: add to (positive) or retire from (negative) the reserve
    AdjustReserve {
        #[arg(long)]
        caller: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Owner: issue resource to an account
    Issue {
        #[arg(long)]
        caller: String,
        to: String,
        amount: u64,
    },
    /// Record a confirmed currency deposit
    Deposit {
        #[arg(long)]
        caller: String,
        amount: u64,
    },
    /// Withdraw currency from the caller's balance
    Withdraw {
        #[arg(long)]
        caller: String,
        amount: u64,
    },
    /// List resource for sale (adds to any existing listing)
    List {
        #[arg(long)]
        caller: String,
        amount: u64,
        price: u64,
    },
    /// Take resource off the caller's listing
    Unlist {
        #[arg(long)]
        caller: String,
        amount: u64,
    },
    /// Change the caller's listing price
    SetListingPrice {
        #[arg(long)]
        caller: String,
        price: u64,
    },
    /// Buy from a seller's listing
    Buy {
        #[arg(long)]
        caller: String,
        seller: String,
        amount: u64,
    },
    /// Sell unlisted resource back at the refund rate
    Redeem {
        #[arg(long)]
        caller: String,
        amount: u64,
    },
    /// Fee charged on an amount
    Fee { amount: u64 },
    /// Refund paid for an amount of resource
    Refund { amount: u64 },
    /// Current reserve
    Reserve,
    /// Current fee percentage
    FeePercent,
    /// Balances of an account
    Balance { account: String },
    /// Listing of an account
    Listing { account: String },
    /// Apply a JSON array of requests as one all-or-nothing batch
    Apply {
        file: PathBuf,
        /// 64 hex chars; defaults to the SHA-256 of the file
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// State root of the snapshot
    Root,
}

impl Command {
    /// The ledger call behind a mutating command, if any.
    fn into_request(self) -> Result<Request, Command> {
        let (caller, call) = match self {
            Command::SetUnitPrice { caller, price } => (caller, Call::SetUnitPrice { price }),
            Command::SetFeePercent { caller, percent } => {
                (caller, Call::SetFeePercent { percent })
            }
            Command::SetRefundPercent { caller, percent } => {
                (caller, Call::SetRefundPercent { percent })
            }
            Command::SetReserveCap { caller, limit } => (caller, Call::SetReserveCap { limit }),
            Command::AdjustReserve { caller, delta } => (caller, Call::AdjustReserve { delta }),
            Command::Issue { caller, to, amount } => (caller, Call::IssueResource { to, amount }),
            Command::Deposit { caller, amount } => (caller, Call::DepositCurrency { amount }),
            Command::Withdraw { caller, amount } => (caller, Call::WithdrawCurrency { amount }),
            Command::List {
                caller,
                amount,
                price,
            } => (caller, Call::AddForSale { amount, price }),
            Command::Unlist { caller, amount } => (caller, Call::RemoveFromSale { amount }),
            Command::SetListingPrice { caller, price } => {
                (caller, Call::SetListingPrice { price })
            }
            Command::Buy {
                caller,
                seller,
                amount,
            } => (caller, Call::Purchase { seller, amount }),
            Command::Redeem { caller, amount } => (caller, Call::Redeem { amount }),
            other => return Err(other),
        };
        Ok(Request { caller, call })
    }
}

//==================== Утилиты ====================//

fn init_tracing(verbose: bool, config: &AppConfig) {
    let filter = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_batch_id(hex_id: &str) -> Result<BatchId> {
    let bytes = hex::decode(hex_id.trim()).context("batch id is not hex")?;
    let Ok(id) = BatchId::try_from(bytes.as_slice()) else {
        bail!("batch id must be 32 bytes, got {}", bytes.len());
    };
    Ok(id)
}

/// Single commands are keyed by height so repeating one is a new batch.
fn single_batch_id(ledger: &Ledger, request: &Request) -> Result<BatchId> {
    let mut hasher = Sha256::new();
    hasher.update(b"single");
    hasher.update(ledger.meta().height.to_le_bytes());
    hasher.update(serde_json::to_vec(request)?);
    Ok(hasher.finalize().into())
}

//==================== Команды ====================//

fn init_cmd(store: &SnapshotStore, config: &AppConfig, force: bool) -> Result<()> {
    if store.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            store.path().display()
        );
    }
    let ledger = config.build_ledger()?;
    store.save(&ledger)?;
    info!(
        path = %store.path().display(),
        owner = ledger.owner(),
        "ledger initialised"
    );
    print_json(&ledger.snapshot())
}

fn apply_cmd(store: &SnapshotStore, file: PathBuf, batch_id: Option<String>) -> Result<()> {
    let bytes = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let requests: Vec<Request> = serde_json::from_slice(&bytes)
        .with_context(|| format!("decoding requests from {}", file.display()))?;
    let batch_id = match batch_id {
        Some(hex_id) => parse_batch_id(&hex_id)?,
        None => Sha256::digest(&bytes).into(),
    };
    let mut ledger = store.load()?;
    let outcomes = ledger.apply_batch(&requests, batch_id, now_secs())?;
    store.save(&ledger)?;
    info!(
        calls = requests.len(),
        height = ledger.meta().height,
        "batch committed"
    );
    print_json(&outcomes)
}

fn request_cmd(store: &SnapshotStore, request: Request) -> Result<()> {
    let mut ledger = store.load()?;
    let batch_id = single_batch_id(&ledger, &request)?;
    let outcome: Outcome = ledger
        .apply_batch(std::slice::from_ref(&request), batch_id, now_secs())?
        .remove(0);
    store.save(&ledger)?;
    info!(
        caller = %request.caller,
        height = ledger.meta().height,
        "call committed"
    );
    print_json(&outcome)
}

fn query_cmd(store: &SnapshotStore, command: Command) -> Result<()> {
    let ledger = store.load()?;
    match command {
        Command::Fee { amount } => print_json(&ledger.calculate_fee(amount)?),
        Command::Refund { amount } => print_json(&ledger.calculate_refund(amount)?),
        Command::Reserve => print_json(&ledger.view_reserve()),
        Command::FeePercent => print_json(&ledger.view_fee_percent()),
        Command::Balance { account } => print_json(&ledger.balance_of(&account)),
        Command::Listing { account } => print_json(&ledger.listing_of(&account)),
        Command::Root => print_json(&hex::encode(ledger.state_root())),
        _ => unreachable!("mutating commands are dispatched before queries"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading config")?;
    init_tracing(cli.verbose, &config);

    let store = SnapshotStore::new(cli.state);
    match cli.command {
        Command::Init { force } => init_cmd(&store, &config, force),
        Command::Apply { file, batch_id } => apply_cmd(&store, file, batch_id),
        command => match command.into_request() {
            Ok(request) => request_cmd(&store, request),
            Err(query) => query_cmd(&store, query),
        },
    }
}
