//! Points admin CLI
//!
//! Staff-facing front end for the points ledger. Every command prints one
//! JSON document on stdout.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use points_ledger::{Config, HistoryEntry, Ledger, UserId, UserRef};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Points admin CLI
#[derive(Parser, Debug)]
#[command(name = "points-admin")]
#[command(about = "Administer pilot point balances")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration
    #[arg(short, long, env = "POINTS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Who is changing whose balance
#[derive(Args, Debug)]
struct MutationArgs {
    /// Target account id
    account: String,

    /// Target display name
    #[arg(long, default_value = "")]
    name: String,

    /// Staff member performing the change
    #[arg(long)]
    actor: String,

    /// Staff display name
    #[arg(long, default_value = "")]
    actor_name: String,

    /// Free-text reason recorded in history
    #[arg(short, long)]
    reason: Option<String>,
}

impl MutationArgs {
    fn check(&self) -> anyhow::Result<()> {
        parse_account(&self.account)?;
        if self.actor().id.is_empty() {
            bail!("Actor id must not be empty");
        }
        Ok(())
    }

    fn target(&self) -> UserRef {
        UserRef::new(self.account.trim(), self.name.as_str())
    }

    fn actor(&self) -> UserRef {
        UserRef::new(self.actor.trim(), self.actor_name.as_str())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add points to an account
    Credit {
        #[command(flatten)]
        who: MutationArgs,

        /// Points to add
        amount: i64,
    },

    /// Remove points from an account
    Debit {
        #[command(flatten)]
        who: MutationArgs,

        /// Points to remove
        amount: i64,
    },

    /// Overwrite an account's balance
    Set {
        #[command(flatten)]
        who: MutationArgs,

        /// New balance
        amount: i64,
    },

    /// Show an account's balance
    Balance {
        /// Account id
        account: String,
    },

    /// Show the top balances
    Leaderboard {
        /// Number of entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show an account's recent history
    History {
        /// Account id
        account: String,

        /// Number of entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show ledger-wide counters
    Stats,

    /// Show database location, size and counters
    Info,

    /// Reconcile an account and verify its hash chain
    Audit {
        /// Account id
        account: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Failed to read environment")?,
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }

    Ok(config)
}

fn parse_account(raw: &str) -> anyhow::Result<UserId> {
    let id = UserId::new(raw.trim());
    if id.is_empty() {
        bail!("Account id must not be empty");
    }
    Ok(id)
}

fn timestamp_json(secs: i64) -> Value {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(at) => Value::String(at.to_rfc3339()),
        None => Value::Null,
    }
}

fn history_json(entry: &HistoryEntry) -> Value {
    json!({
        "seq": entry.seq,
        "account_id": entry.account_id,
        "actor_id": entry.actor_id,
        "actor_name": entry.actor_name,
        "amount": entry.amount,
        "kind": entry.kind.to_string(),
        "reason": entry.reason,
        "timestamp": entry.timestamp,
        "recorded_at": timestamp_json(entry.timestamp),
        "hash": hex::encode(entry.hash),
    })
}

/// Run one command. `existed` says whether the data directory was there
/// before this process opened it.
async fn run(
    ledger: &Ledger,
    config: &Config,
    existed: bool,
    command: Command,
) -> anyhow::Result<Value> {
    let limits = &config.limits;
    let query = ledger.query();

    let output = match command {
        Command::Credit { who, amount } => {
            who.check()?;
            limits.check_amount(amount)?;
            limits.check_reason(who.reason.as_deref())?;
            let balance = ledger
                .credit(&who.target(), amount, &who.actor(), who.reason.as_deref())
                .await?;
            json!({ "account_id": who.target().id, "balance": balance })
        }
        Command::Debit { who, amount } => {
            who.check()?;
            limits.check_amount(amount)?;
            limits.check_reason(who.reason.as_deref())?;
            let balance = ledger
                .debit(&who.target(), amount, &who.actor(), who.reason.as_deref())
                .await?;
            json!({ "account_id": who.target().id, "balance": balance })
        }
        Command::Set { who, amount } => {
            who.check()?;
            limits.check_target(amount)?;
            limits.check_reason(who.reason.as_deref())?;
            let outcome = ledger
                .set_balance(&who.target(), amount, &who.actor(), who.reason.as_deref())
                .await?;
            json!({
                "account_id": who.target().id,
                "old_balance": outcome.old_balance,
                "new_balance": outcome.new_balance,
            })
        }
        Command::Balance { account } => {
            let id = parse_account(&account)?;
            match query.get_account(&id)? {
                Some(account) => json!({
                    "account_id": account.id,
                    "display_name": account.display_name,
                    "balance": account.balance,
                    "last_modified": account.last_modified,
                    "last_updated": timestamp_json(account.last_modified),
                }),
                None => json!({
                    "account_id": id,
                    "display_name": Value::Null,
                    "balance": 0,
                    "last_modified": Value::Null,
                    "last_updated": Value::Null,
                }),
            }
        }
        Command::Leaderboard { limit } => {
            let limit = limit.unwrap_or_else(|| query.default_page_size());
            let board = query.get_leaderboard(limit)?;
            let rows: Vec<Value> = board
                .iter()
                .enumerate()
                .map(|(rank, account)| {
                    json!({
                        "rank": rank + 1,
                        "account_id": account.id,
                        "display_name": account.display_name,
                        "balance": account.balance,
                    })
                })
                .collect();
            Value::Array(rows)
        }
        Command::History { account, limit } => {
            let id = parse_account(&account)?;
            let limit = limit.unwrap_or_else(|| query.default_page_size());
            let entries = query.get_history(&id, limit)?;
            Value::Array(entries.iter().map(history_json).collect())
        }
        Command::Stats => serde_json::to_value(query.get_stats()?)?,
        Command::Info => json!({
            "data_dir": config.data_dir.display().to_string(),
            "existed": existed,
            "disk_usage": query.get_disk_usage()?,
            "stats": query.get_stats()?,
        }),
        Command::Audit { account } => {
            let report = query.audit_account(&parse_account(&account)?)?;
            let clean = report.is_clean();
            let mut value = serde_json::to_value(report)?;
            value["clean"] = Value::Bool(clean);
            value
        }
    };

    Ok(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let existed = config.data_dir.exists();
    tracing::info!(data_dir = %config.data_dir.display(), existed, "Opening points ledger");
    let ledger = Ledger::open(config.clone()).context("Failed to open ledger")?;

    let result = run(&ledger, &config, existed, cli.command).await;
    ledger.shutdown().context("Failed to close ledger")?;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
