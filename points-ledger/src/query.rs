//! Read-only projections over the ledger
//!
//! Each call reads from its own RocksDB snapshot, so it sees whatever was
//! committed when it started and never blocks writers.

use crate::{
    config::LedgerConfig,
    crypto,
    storage::Storage,
    types::{Account, AuditReport, DiskUsage, HistoryEntry, LedgerStats, UserId},
    Result,
};
use std::sync::Arc;

/// Query layer
#[derive(Debug, Clone)]
pub struct Query {
    storage: Arc<Storage>,
    default_page_size: usize,
    max_page_size: usize,
}

impl Query {
    /// Create a query handle over `storage`
    pub fn new(storage: Arc<Storage>, config: &LedgerConfig) -> Self {
        Self {
            storage,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    /// Page size to use when the caller has no preference
    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    /// Current balance, 0 for an account that was never written
    pub fn get_balance(&self, id: &UserId) -> Result<i64> {
        Ok(self
            .storage
            .read_account(id)?
            .map(|account| account.balance)
            .unwrap_or(0))
    }

    /// Full account record, if the account exists
    pub fn get_account(&self, id: &UserId) -> Result<Option<Account>> {
        self.storage.read_account(id)
    }

    /// Accounts with a positive balance, highest first
    pub fn get_leaderboard(&self, limit: usize) -> Result<Vec<Account>> {
        let accounts = self.storage.query_top_accounts(self.clamp(limit))?;
        Ok(accounts
            .into_iter()
            .take_while(|account| account.balance > 0)
            .collect())
    }

    /// Most recent history entries for an account, newest first
    pub fn get_history(&self, id: &UserId, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.storage.query_history(id, self.clamp(limit))
    }

    /// Ledger-wide counters
    pub fn get_stats(&self) -> Result<LedgerStats> {
        self.storage.aggregate_stats()
    }

    /// Size of the database on disk
    pub fn get_disk_usage(&self) -> Result<DiskUsage> {
        self.storage.disk_usage()
    }

    /// Recompute an account's balance from its history and re-verify the
    /// hash chain
    pub fn audit_account(&self, id: &UserId) -> Result<AuditReport> {
        let (account, entries) = self.storage.read_account_with_history(id)?;

        let balance = account.map(|account| account.balance).unwrap_or(0);
        let history_sum = entries
            .iter()
            .fold(0i64, |sum, entry| sum.saturating_add(entry.amount));
        let chain_intact = crypto::verify_chain(&entries)?;

        let report = AuditReport {
            account_id: id.clone(),
            balance,
            history_sum,
            entries: entries.len() as u64,
            reconciled: balance == history_sum,
            chain_intact,
        };

        if !report.is_clean() {
            tracing::warn!(
                account = %id,
                balance,
                history_sum,
                chain_intact,
                "Account failed audit"
            );
        }

        Ok(report)
    }

    fn clamp(&self, limit: usize) -> usize {
        limit.min(self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserRef;
    use crate::{Config, Ledger};
    use tempfile::TempDir;

    fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        config.ledger.max_page_size = 20;

        (Ledger::open(config).unwrap(), temp_dir)
    }

    fn staff() -> UserRef {
        UserRef::new("staff", "Tower")
    }

    #[tokio::test]
    async fn test_leaderboard_excludes_non_positive() {
        let (ledger, _temp) = create_test_ledger();
        let staff = staff();

        ledger.set_balance(&UserRef::new("A", "a"), 50, &staff, None).await.unwrap();
        ledger.set_balance(&UserRef::new("B", "b"), 100, &staff, None).await.unwrap();
        ledger.set_balance(&UserRef::new("C", "c"), 0, &staff, None).await.unwrap();
        ledger.debit(&UserRef::new("D", "d"), 5, &staff, None).await.unwrap();

        let board: Vec<_> = ledger
            .query()
            .get_leaderboard(10)
            .unwrap()
            .into_iter()
            .map(|a| (a.id.to_string(), a.balance))
            .collect();
        assert_eq!(board, vec![("B".to_string(), 100), ("A".to_string(), 50)]);

        assert!(ledger.query().get_leaderboard(0).unwrap().is_empty());
        assert_eq!(ledger.query().get_leaderboard(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_window_slides() {
        let (ledger, _temp) = create_test_ledger();
        let pilot = UserRef::new("pilot", "Goose");

        for _ in 0..15 {
            ledger.credit(&pilot, 1, &staff(), None).await.unwrap();
        }

        let query = ledger.query();
        let window = query.get_history(&pilot.id, 10).unwrap();
        assert_eq!(window.len(), 10);
        let seqs: Vec<_> = window.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (6..=15).rev().collect::<Vec<_>>());

        ledger.credit(&pilot, 1, &staff(), None).await.unwrap();
        let shifted = query.get_history(&pilot.id, 10).unwrap();
        assert_eq!(shifted[0].seq, 16);
        assert_eq!(shifted.last().unwrap().seq, 7);
        assert!(!shifted.iter().any(|e| e.seq == 6));
    }

    #[tokio::test]
    async fn test_limits_are_clamped() {
        let (ledger, _temp) = create_test_ledger();
        let pilot = UserRef::new("pilot", "Goose");

        for _ in 0..25 {
            ledger.credit(&pilot, 1, &staff(), None).await.unwrap();
        }

        assert_eq!(ledger.query().get_history(&pilot.id, 1_000).unwrap().len(), 20);
        assert_eq!(ledger.query().default_page_size(), 10);
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let (ledger, _temp) = create_test_ledger();
        let pilot = UserRef::new("pilot", "Goose");
        ledger.credit(&pilot, 12, &staff(), Some("first")).await.unwrap();
        ledger.debit(&pilot, 2, &staff(), None).await.unwrap();

        let query = ledger.query();
        assert_eq!(query.get_balance(&pilot.id).unwrap(), query.get_balance(&pilot.id).unwrap());
        assert_eq!(
            query.get_history(&pilot.id, 10).unwrap(),
            query.get_history(&pilot.id, 10).unwrap()
        );
        assert_eq!(query.get_stats().unwrap(), query.get_stats().unwrap());
    }

    #[tokio::test]
    async fn test_absent_account_reads_as_empty() {
        let (ledger, _temp) = create_test_ledger();
        let nobody = UserId::new("nobody");

        let query = ledger.query();
        assert_eq!(query.get_balance(&nobody).unwrap(), 0);
        assert!(query.get_account(&nobody).unwrap().is_none());
        assert!(query.get_history(&nobody, 10).unwrap().is_empty());

        let report = query.audit_account(&nobody).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.entries, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (ledger, _temp) = create_test_ledger();
        let staff = staff();

        ledger.credit(&UserRef::new("a", "a"), 50, &staff, None).await.unwrap();
        ledger.credit(&UserRef::new("b", "b"), 100, &staff, None).await.unwrap();
        ledger.debit(&UserRef::new("b", "b"), 30, &staff, None).await.unwrap();
        ledger.debit(&UserRef::new("c", "c"), 5, &staff, None).await.unwrap();

        let stats = ledger.query().get_stats().unwrap();
        assert_eq!(stats.accounts_with_positive_balance, 2);
        assert_eq!(stats.total_points, 115);
        assert_eq!(stats.total_history_entries, 4);
    }

    #[tokio::test]
    async fn test_audit_detects_tampering() {
        let (ledger, _temp) = create_test_ledger();
        let pilot = UserRef::new("pilot", "Goose");

        ledger.credit(&pilot, 10, &staff(), None).await.unwrap();
        ledger.credit(&pilot, 20, &staff(), None).await.unwrap();
        ledger.debit(&pilot, 5, &staff(), None).await.unwrap();

        let query = ledger.query();
        let report = query.audit_account(&pilot.id).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.balance, 25);
        assert_eq!(report.history_sum, 25);
        assert_eq!(report.entries, 3);

        // Rewrite the middle entry without re-sealing it
        let mut entries = ledger.storage().query_full_history(&pilot.id).unwrap();
        entries[1].amount = 200;
        ledger.storage().overwrite_history_raw(&entries[1]).unwrap();

        let report = query.audit_account(&pilot.id).unwrap();
        assert!(!report.reconciled);
        assert!(!report.chain_intact);
        assert_eq!(report.history_sum, 205);
    }
}
