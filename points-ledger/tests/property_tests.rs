//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify:
//! - Reconciliation: balance == Σ(history amounts) after any mutation sequence
//! - Model agreement: the ledger matches a plain in-memory fold
//! - Leaderboard ordering: non-increasing, positive balances only

use points_ledger::{Config, Error, Ledger, UserRef};
use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Credit(i64),
    Debit(i64),
    Set(i64),
}

/// Strategy for generating staff mutations
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..10_000).prop_map(Op::Credit),
        (1i64..10_000).prop_map(Op::Debit),
        (0i64..10_000).prop_map(Op::Set),
    ]
}

/// Strategy for generating account ids from a small pool
fn account_strategy() -> impl Strategy<Value = String> {
    "[a-e]".prop_map(|s| format!("pilot-{}", s))
}

/// Create test ledger with temp directory
fn create_test_ledger() -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;

    (Ledger::open(config).unwrap(), temp_dir)
}

async fn apply(ledger: &Ledger, target: &UserRef, op: &Op) -> Result<i64, Error> {
    let staff = UserRef::new("staff", "Tower");
    match *op {
        Op::Credit(amount) => ledger.credit(target, amount, &staff, None).await,
        Op::Debit(amount) => ledger.debit(target, amount, &staff, None).await,
        Op::Set(amount) => ledger
            .set_balance(target, amount, &staff, None)
            .await
            .map(|outcome| outcome.new_balance),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: every account reconciles after any mutation sequence
    #[test]
    fn prop_balances_reconcile(ops in prop::collection::vec((account_strategy(), op_strategy()), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger();
            let mut model: HashMap<String, i64> = HashMap::new();

            for (account, op) in &ops {
                let target = UserRef::new(account.as_str(), account.as_str());
                let balance = apply(&ledger, &target, op).await.unwrap();

                let expected = model.entry(account.clone()).or_insert(0);
                *expected = match *op {
                    Op::Credit(amount) => *expected + amount,
                    Op::Debit(amount) => *expected - amount,
                    Op::Set(amount) => amount,
                };
                prop_assert_eq!(balance, *expected);
            }

            let query = ledger.query();
            for (account, expected) in &model {
                let report = query.audit_account(&account.as_str().into()).unwrap();
                prop_assert!(report.is_clean());
                prop_assert_eq!(report.balance, *expected);
            }

            let stats = query.get_stats().unwrap();
            prop_assert_eq!(stats.total_history_entries, ops.len() as u64);
            prop_assert_eq!(stats.total_points, model.values().sum::<i64>());
            prop_assert_eq!(
                stats.accounts_with_positive_balance,
                model.values().filter(|b| **b > 0).count() as u64
            );

            drop(query);
            ledger.shutdown().unwrap();
            Ok(())
        })?;
    }

    /// Property: leaderboard is sorted and holds only positive balances
    #[test]
    fn prop_leaderboard_ordered(ops in prop::collection::vec((account_strategy(), op_strategy()), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger();

            for (account, op) in &ops {
                let target = UserRef::new(account.as_str(), account.as_str());
                apply(&ledger, &target, op).await.unwrap();
            }

            let board = ledger.query().get_leaderboard(10).unwrap();
            prop_assert!(board.iter().all(|account| account.balance > 0));
            prop_assert!(board.windows(2).all(|w| w[0].balance >= w[1].balance));
            for pair in board.windows(2) {
                if pair[0].balance == pair[1].balance {
                    prop_assert!(pair[0].ordinal < pair[1].ordinal);
                }
            }

            ledger.shutdown().unwrap();
            Ok(())
        })?;
    }

    /// Property: invalid amounts never touch storage
    #[test]
    fn prop_non_positive_amounts_rejected(amount in i64::MIN..=0) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger();
            let target = UserRef::new("pilot", "Goose");

            let credit = apply(&ledger, &target, &Op::Credit(amount)).await;
            let debit = apply(&ledger, &target, &Op::Debit(amount)).await;
            prop_assert!(credit.unwrap_err().is_validation());
            prop_assert!(debit.unwrap_err().is_validation());
            prop_assert!(ledger.query().get_account(&target.id).unwrap().is_none());

            ledger.shutdown().unwrap();
            Ok(())
        })?;
    }
}
