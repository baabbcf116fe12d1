//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account records (key: account id)
//! - `history` - Append-only history log (key: sequence id, big-endian)
//! - `balance_index` - Leaderboard order (key: !balance || ordinal || account id)
//! - `history_index` - Per-account history order (key: account || !timestamp || !seq)
//! - `chain` - Hash of each account's latest history entry (key: account id)
//!
//! All writes go through [`StorageTxn`], a pessimistic RocksDB transaction.
//! Reading an account for update takes an exclusive row lock that is held
//! until commit or abort, so two writers on the same account serialize.

use crate::{
    crypto::{self, GENESIS_HASH},
    error::{Error, Result},
    types::{Account, DiskUsage, HistoryEntry, LedgerStats, NewHistoryEntry, UserId},
    Config,
};
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options,
    SnapshotWithThreadMode, Transaction, TransactionDB, TransactionDBOptions, TransactionOptions,
    WriteOptions,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_HISTORY: &str = "history";
const CF_BALANCE_INDEX: &str = "balance_index";
const CF_HISTORY_INDEX: &str = "history_index";
const CF_CHAIN: &str = "chain";

const SIGN_BIT: u64 = 1 << 63;

type Snapshot<'a> = SnapshotWithThreadMode<'a, TransactionDB>;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: TransactionDB,

    /// Next history sequence id
    next_seq: AtomicU64,

    /// Next account ordinal
    next_ordinal: AtomicU64,

    sync_writes: bool,
    lock_timeout_ms: i64,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("next_seq", &self.next_seq.load(Ordering::SeqCst))
            .field("next_ordinal", &self.next_ordinal.load(Ordering::SeqCst))
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.rocksdb.txn_lock_timeout_ms);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_BALANCE_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_HISTORY_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_CHAIN, Self::cf_options_records()),
        ];

        let db: TransactionDB =
            TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        let storage = Self {
            db,
            next_seq: AtomicU64::new(1),
            next_ordinal: AtomicU64::new(0),
            sync_writes: config.rocksdb.sync_writes,
            lock_timeout_ms: config.rocksdb.txn_lock_timeout_ms,
        };

        let next_seq = storage.recover_last_seq()? + 1;
        let next_ordinal = storage.recover_next_ordinal()?;
        storage.next_seq.store(next_seq, Ordering::SeqCst);
        storage.next_ordinal.store(next_ordinal, Ordering::SeqCst);

        tracing::info!(
            path = ?path,
            next_seq,
            next_ordinal,
            "Opened points storage"
        );

        Ok(storage)
    }

    // Column family options

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        // Read on every mutation and query, favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn recover_last_seq(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_HISTORY)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);

        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                decode_u64(&key)
            }
            None => Ok(0),
        }
    }

    fn recover_next_ordinal(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut next = 0u64;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            next = next.max(account.ordinal + 1);
        }

        Ok(next)
    }

    // Transactions

    /// Start a unit of work.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub fn begin(&self) -> StorageTxn<'_> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        txn_opts.set_deadlock_detect(true);

        StorageTxn {
            storage: self,
            txn: self.db.transaction_opt(&write_opts, &txn_opts),
        }
    }

    // Committed reads

    /// Get account by ID (committed state, no locks)
    pub fn read_account(&self, id: &UserId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Accounts in descending balance order, ties in insertion order
    pub fn query_top_accounts(&self, limit: usize) -> Result<Vec<Account>> {
        let cf_index = self.cf_handle(CF_BALANCE_INDEX)?;
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let snapshot = self.db.snapshot();

        let mut accounts = Vec::new();
        if limit == 0 {
            return Ok(accounts);
        }

        for item in snapshot.iterator_cf(cf_index, IteratorMode::Start) {
            let (key, _) = item?;
            let id = account_id_from_balance_key(&key)?;

            let value = snapshot
                .get_cf(cf_accounts, id.as_bytes())?
                .ok_or_else(|| {
                    Error::Corruption(format!("Balance index points at missing account {}", id))
                })?;
            accounts.push(bincode::deserialize(&value)?);

            if accounts.len() >= limit {
                break;
            }
        }

        Ok(accounts)
    }

    /// Most recent history for one account: descending timestamp, ties by
    /// descending sequence id
    pub fn query_history(&self, id: &UserId, limit: usize) -> Result<Vec<HistoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.scan_history(&self.db.snapshot(), id, Some(limit))
    }

    /// Every history entry for one account, ascending sequence id
    pub fn query_full_history(&self, id: &UserId) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.scan_history(&self.db.snapshot(), id, None)?;
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries)
    }

    /// An account and its full history (ascending sequence id), read from
    /// one snapshot
    pub fn read_account_with_history(
        &self,
        id: &UserId,
    ) -> Result<(Option<Account>, Vec<HistoryEntry>)> {
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let snapshot = self.db.snapshot();

        let account = match snapshot.get_cf(cf_accounts, id.as_bytes())? {
            Some(value) => Some(bincode::deserialize(&value)?),
            None => None,
        };
        let mut entries = self.scan_history(&snapshot, id, None)?;
        entries.sort_by_key(|entry| entry.seq);

        Ok((account, entries))
    }

    fn scan_history(
        &self,
        snapshot: &Snapshot<'_>,
        id: &UserId,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>> {
        let cf_index = self.cf_handle(CF_HISTORY_INDEX)?;
        let cf_history = self.cf_handle(CF_HISTORY)?;

        let prefix = history_prefix(id);
        let iter = snapshot.iterator_cf(cf_index, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, seq_bytes) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let value = snapshot.get_cf(cf_history, &seq_bytes)?.ok_or_else(|| {
                Error::Corruption(format!(
                    "History index points at missing entry {}",
                    decode_u64(&seq_bytes).unwrap_or_default()
                ))
            })?;
            entries.push(bincode::deserialize(&value)?);

            if limit.is_some_and(|limit| entries.len() >= limit) {
                break;
            }
        }

        Ok(entries)
    }

    /// Ledger-wide counters from one snapshot
    pub fn aggregate_stats(&self) -> Result<LedgerStats> {
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_history = self.cf_handle(CF_HISTORY)?;
        let snapshot = self.db.snapshot();

        let mut stats = LedgerStats::default();

        for item in snapshot.iterator_cf(cf_accounts, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            if account.balance > 0 {
                stats.accounts_with_positive_balance += 1;
            }
            stats.total_points = stats.total_points.saturating_add(account.balance);
        }

        for item in snapshot.iterator_cf(cf_history, IteratorMode::Start) {
            item?;
            stats.total_history_entries += 1;
        }

        Ok(stats)
    }

    /// Highest sequence id handed out so far (0 before the first append)
    pub fn last_sequence(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    /// Sizes of the files in the database directory.
    ///
    /// `TransactionDB` exposes no property queries, so this walks the
    /// directory instead of reading `rocksdb.total-sst-files-size`.
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        let mut usage = DiskUsage::default();

        for dir_entry in std::fs::read_dir(self.db.path())? {
            let dir_entry = dir_entry?;
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            usage.total_bytes += metadata.len();
            if dir_entry.path().extension().is_some_and(|ext| ext == "sst") {
                usage.sst_bytes += metadata.len();
            }
        }

        Ok(usage)
    }

    /// Replace a stored history entry in place, bypassing the chain
    #[cfg(test)]
    pub(crate) fn overwrite_history_raw(&self, entry: &HistoryEntry) -> Result<()> {
        let cf = self.cf_handle(CF_HISTORY)?;
        self.db.put_cf(cf, seq_key(entry.seq), bincode::serialize(entry)?)?;
        Ok(())
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("Points storage closed");
        Ok(())
    }
}

/// An open unit of work against [`Storage`]
pub struct StorageTxn<'a> {
    storage: &'a Storage,
    txn: Transaction<'a, TransactionDB>,
}

impl fmt::Debug for StorageTxn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageTxn").finish_non_exhaustive()
    }
}

impl<'a> StorageTxn<'a> {
    /// Read an account and lock it until this transaction ends
    pub fn read_account(&self, id: &UserId) -> Result<Option<Account>> {
        let cf = self.storage.cf_handle(CF_ACCOUNTS)?;

        match self.txn.get_for_update_cf(cf, id.as_bytes(), true)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace an account's balance.
    ///
    /// Refreshes the display name and last-modified timestamp and moves the
    /// account's leaderboard index entry. A new account gets the next ordinal.
    pub fn upsert_account(&self, id: &UserId, display_name: &str, balance: i64) -> Result<Account> {
        let cf_accounts = self.storage.cf_handle(CF_ACCOUNTS)?;
        let cf_index = self.storage.cf_handle(CF_BALANCE_INDEX)?;

        let ordinal = match self.read_account(id)? {
            Some(existing) => {
                self.txn.delete_cf(
                    cf_index,
                    balance_key(existing.balance, existing.ordinal, &existing.id),
                )?;
                existing.ordinal
            }
            None => self.storage.next_ordinal.fetch_add(1, Ordering::SeqCst),
        };

        let account = Account {
            id: id.clone(),
            display_name: display_name.to_string(),
            balance,
            last_modified: Utc::now().timestamp(),
            ordinal,
        };

        self.txn
            .put_cf(cf_accounts, id.as_bytes(), bincode::serialize(&account)?)?;
        self.txn
            .put_cf(cf_index, balance_key(balance, ordinal, id), b"")?;

        tracing::debug!(account = %id, balance, ordinal, "Account upserted");

        Ok(account)
    }

    /// Append a history entry: assigns its sequence id and links it onto the
    /// account's hash chain
    pub fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let cf_history = self.storage.cf_handle(CF_HISTORY)?;
        let cf_index = self.storage.cf_handle(CF_HISTORY_INDEX)?;
        let cf_chain = self.storage.cf_handle(CF_CHAIN)?;

        let prev_hash = match self
            .txn
            .get_for_update_cf(cf_chain, entry.account_id.as_bytes(), true)?
        {
            Some(bytes) => decode_hash(&bytes)?,
            None => GENESIS_HASH,
        };

        let seq = self.storage.next_seq.fetch_add(1, Ordering::SeqCst);

        let mut record = HistoryEntry {
            seq,
            account_id: entry.account_id,
            actor_id: entry.actor_id,
            actor_name: entry.actor_name,
            amount: entry.amount,
            kind: entry.kind,
            reason: entry.reason,
            timestamp: entry.timestamp,
            prev_hash: GENESIS_HASH,
            hash: GENESIS_HASH,
        };
        crypto::seal_entry(&mut record, prev_hash)?;

        self.txn
            .put_cf(cf_history, seq_key(seq), bincode::serialize(&record)?)?;
        self.txn.put_cf(
            cf_index,
            history_index_key(&record.account_id, record.timestamp, seq),
            seq_key(seq),
        )?;
        self.txn
            .put_cf(cf_chain, record.account_id.as_bytes(), record.hash)?;

        tracing::debug!(
            seq,
            account = %record.account_id,
            amount = record.amount,
            "History appended"
        );

        Ok(record)
    }

    /// Make every write in this unit durable and visible together
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every write in this unit
    pub fn abort(self) -> Result<()> {
        self.txn.rollback()?;
        Ok(())
    }
}

// Key helpers

/// Order-preserving map from i64 to u64
fn sortable_i64(value: i64) -> u64 {
    (value as u64) ^ SIGN_BIT
}

fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

fn balance_key(balance: i64, ordinal: u64, id: &UserId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + id.as_bytes().len());
    key.extend_from_slice(&(!sortable_i64(balance)).to_be_bytes());
    key.extend_from_slice(&ordinal.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn account_id_from_balance_key(key: &[u8]) -> Result<UserId> {
    let raw = key
        .get(16..)
        .ok_or_else(|| Error::Corruption("Balance index key too short".to_string()))?;
    let id = std::str::from_utf8(raw)
        .map_err(|e| Error::Corruption(format!("Balance index key is not UTF-8: {}", e)))?;
    Ok(UserId::new(id))
}

/// Length-prefixed so that no account's prefix is a prefix of another's
fn history_prefix(id: &UserId) -> Vec<u8> {
    let bytes = id.as_bytes();
    let mut key = Vec::with_capacity(4 + bytes.len() + 16);
    key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

fn history_index_key(id: &UserId, timestamp: i64, seq: u64) -> Vec<u8> {
    let mut key = history_prefix(id);
    key.extend_from_slice(&(!sortable_i64(timestamp)).to_be_bytes());
    key.extend_from_slice(&(!seq).to_be_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Corruption(format!("Expected 8-byte key, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_hash(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Error::Corruption(format!("Expected 32-byte hash, got {}", bytes.len())))
}
