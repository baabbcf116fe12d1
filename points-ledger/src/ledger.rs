//! Ledger service: the only writer of balances
//!
//! Every mutation is one storage transaction that reads the account for
//! update, writes the new balance and appends the matching history entry.
//! Either both land or neither does.
//!
//! # Example
//!
//! ```no_run
//! use points_ledger::{Config, Ledger, UserRef};
//!
//! #[tokio::main]
//! async fn main() -> points_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let pilot = UserRef::new(1001u64, "maverick");
//!     let staff = UserRef::new(7u64, "iceman");
//!     let balance = ledger.credit(&pilot, 50, &staff, Some("Smooth landing")).await?;
//!     assert_eq!(ledger.query().get_balance(&pilot.id)?, balance);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    config::LedgerConfig,
    metrics::Metrics,
    query::Query,
    storage::Storage,
    types::{EntryKind, HistoryEntry, NewHistoryEntry, SetOutcome, UserRef},
    Config, Error, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Balance change requested by the command layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Credit(i64),
    Debit(i64),
    Set(i64),
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Credit(_) => "credit",
            Operation::Debit(_) => "debit",
            Operation::Set(_) => "set",
        }
    }

    /// Input checks that run before any transaction is opened
    fn validate(&self) -> Result<()> {
        match *self {
            Operation::Credit(amount) | Operation::Debit(amount) if amount <= 0 => Err(
                Error::Validation("Amount must be positive".to_string()),
            ),
            Operation::Set(target) if target < 0 => Err(Error::Validation(
                "Target balance cannot be negative".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// New balance, delta and entry kind given the current balance
    fn resolve(&self, current: i64) -> Result<(i64, i64, EntryKind)> {
        let overflow = || Error::Validation(format!("Balance overflow from {}", current));

        match *self {
            Operation::Credit(amount) => {
                let new_balance = current.checked_add(amount).ok_or_else(overflow)?;
                Ok((new_balance, amount, EntryKind::Credit))
            }
            Operation::Debit(amount) => {
                let new_balance = current.checked_sub(amount).ok_or_else(overflow)?;
                Ok((new_balance, -amount, EntryKind::Debit))
            }
            Operation::Set(target) => {
                let delta = target.checked_sub(current).ok_or_else(overflow)?;
                Ok((
                    target,
                    delta,
                    EntryKind::Set {
                        from: current,
                        to: target,
                    },
                ))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Mutation {
    target: UserRef,
    actor: UserRef,
    reason: Option<String>,
    operation: Operation,
}

/// What a committed mutation did
#[derive(Debug, Clone)]
struct Applied {
    old_balance: i64,
    new_balance: i64,
    entry: HistoryEntry,
}

/// Set once the caller stops waiting for a mutation
#[derive(Debug, Clone, Default)]
struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancels the flag if the awaiting future is dropped before completion
#[derive(Debug)]
struct CancelOnDrop {
    flag: CancelFlag,
    armed: bool,
}

impl CancelOnDrop {
    fn new(flag: CancelFlag) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

/// Ledger service
#[derive(Debug, Clone)]
pub struct Ledger {
    /// Shared storage engine
    storage: Arc<Storage>,

    /// Service metrics
    metrics: Metrics,

    /// Service configuration
    config: LedgerConfig,
}

impl Ledger {
    /// Open storage and build a ledger on it
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        Self::new(storage, config.ledger)
    }

    /// Build a ledger on an already open storage engine
    pub fn new(storage: Arc<Storage>, config: LedgerConfig) -> Result<Self> {
        Ok(Self {
            storage,
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Read-only view over the same storage
    pub fn query(&self) -> Query {
        Query::new(Arc::clone(&self.storage), &self.config)
    }

    /// Underlying storage engine
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Service metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Add `amount` points to `target`; returns the new balance
    pub async fn credit(
        &self,
        target: &UserRef,
        amount: i64,
        actor: &UserRef,
        reason: Option<&str>,
    ) -> Result<i64> {
        let applied = self
            .submit(Self::mutation(target, actor, reason, Operation::Credit(amount)))
            .await?;
        Ok(applied.new_balance)
    }

    /// Remove `amount` points from `target`; returns the new balance.
    ///
    /// There is no floor: staff corrections may drive a balance negative.
    pub async fn debit(
        &self,
        target: &UserRef,
        amount: i64,
        actor: &UserRef,
        reason: Option<&str>,
    ) -> Result<i64> {
        let applied = self
            .submit(Self::mutation(target, actor, reason, Operation::Debit(amount)))
            .await?;
        Ok(applied.new_balance)
    }

    /// Overwrite `target`'s balance.
    ///
    /// A set that leaves the balance unchanged still records a zero-amount
    /// history entry, so every staff action is audited.
    pub async fn set_balance(
        &self,
        target: &UserRef,
        target_amount: i64,
        actor: &UserRef,
        reason: Option<&str>,
    ) -> Result<SetOutcome> {
        let applied = self
            .submit(Self::mutation(target, actor, reason, Operation::Set(target_amount)))
            .await?;
        Ok(SetOutcome {
            old_balance: applied.old_balance,
            new_balance: applied.new_balance,
        })
    }

    /// Shutdown ledger; closes storage if no other handle holds it
    pub fn shutdown(self) -> Result<()> {
        match Arc::try_unwrap(self.storage) {
            Ok(storage) => storage.close(),
            Err(_) => {
                tracing::debug!("Storage still shared, leaving it open");
                Ok(())
            }
        }
    }

    fn mutation(
        target: &UserRef,
        actor: &UserRef,
        reason: Option<&str>,
        operation: Operation,
    ) -> Mutation {
        Mutation {
            target: target.clone(),
            actor: actor.clone(),
            reason: reason.map(str::to_string),
            operation,
        }
    }

    /// Validate, then run the transaction on the blocking pool.
    ///
    /// If this future is dropped before the transaction commits, the
    /// transaction aborts instead of committing.
    async fn submit(&self, mutation: Mutation) -> Result<Applied> {
        mutation.operation.validate()?;

        let operation = mutation.operation.name();
        let storage = Arc::clone(&self.storage);
        let metrics = self.metrics.clone();
        let retries = self.config.conflict_retries;
        let cancel = CancelFlag::default();
        let guard = CancelOnDrop::new(cancel.clone());
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            execute(&storage, &mutation, retries, &cancel, &metrics, || Ok(()))
        })
        .await
        .map_err(|e| Error::Concurrency(format!("Ledger task failed: {}", e)))
        .and_then(|result| result);
        guard.disarm();

        match &result {
            Ok(applied) => {
                self.metrics
                    .record_mutation(operation, started.elapsed().as_secs_f64());
                tracing::debug!(
                    operation,
                    account = %applied.entry.account_id,
                    seq = applied.entry.seq,
                    old_balance = applied.old_balance,
                    new_balance = applied.new_balance,
                    "Mutation committed"
                );
            }
            Err(e) => {
                self.metrics.record_failure(operation);
                tracing::warn!(operation, error = %e, "Mutation failed");
            }
        }

        result
    }
}

/// Run a mutation, retrying up to `retries` times on a write conflict
fn execute<F>(
    storage: &Storage,
    mutation: &Mutation,
    retries: u32,
    cancel: &CancelFlag,
    metrics: &Metrics,
    mut checkpoint: F,
) -> Result<Applied>
where
    F: FnMut() -> Result<()>,
{
    let mut attempt = 0;

    loop {
        match apply_once(storage, mutation, cancel, &mut checkpoint) {
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                metrics.record_conflict_retry();
                tracing::warn!(
                    account = %mutation.target.id,
                    attempt,
                    error = %e,
                    "Write conflict, retrying"
                );
            }
            result => return result,
        }
    }
}

/// One read-modify-write transaction.
///
/// `checkpoint` runs between the balance write and the history append.
/// Any early return drops the transaction, which rolls it back.
fn apply_once<F>(
    storage: &Storage,
    mutation: &Mutation,
    cancel: &CancelFlag,
    checkpoint: &mut F,
) -> Result<Applied>
where
    F: FnMut() -> Result<()>,
{
    let txn = storage.begin();

    let old_balance = txn
        .read_account(&mutation.target.id)?
        .map(|account| account.balance)
        .unwrap_or(0);
    let (new_balance, amount, kind) = mutation.operation.resolve(old_balance)?;

    let account = txn.upsert_account(&mutation.target.id, &mutation.target.name, new_balance)?;

    checkpoint()?;

    let entry = txn.append_history(NewHistoryEntry {
        account_id: mutation.target.id.clone(),
        actor_id: mutation.actor.id.clone(),
        actor_name: mutation.actor.name.clone(),
        amount,
        kind,
        reason: mutation.reason.clone(),
        timestamp: account.last_modified,
    })?;

    if cancel.is_cancelled() {
        txn.abort()?;
        return Err(Error::Cancelled);
    }

    txn.commit()?;

    Ok(Applied {
        old_balance,
        new_balance,
        entry,
    })
}
