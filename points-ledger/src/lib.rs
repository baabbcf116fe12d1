//! Points Ledger
//!
//! Per-user integer point balances with a tamper-evident audit trail.
//!
//! # Architecture
//!
//! - **Storage Engine**: RocksDB transactions keep balances, history and
//!   their indexes in step
//! - **Ledger Service**: credit, debit and set as single atomic units
//! - **Query Layer**: leaderboard, paginated history, stats and audits
//!   served from snapshots
//!
//! # Invariants
//!
//! - Reconciliation: an account's balance equals the sum of its history amounts
//! - Atomicity: no balance change without its history entry, and vice versa
//! - Append-only: history entries are never modified or deleted
//! - Linearizable per account: concurrent mutations on one account never lose updates

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod query;
pub mod crypto;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Account, AuditReport, DiskUsage, EntryKind, HistoryEntry, LedgerStats, SetOutcome, UserId,
    UserRef,
};
pub use storage::Storage;
pub use ledger::Ledger;
pub use query::Query;
pub use config::Config;
