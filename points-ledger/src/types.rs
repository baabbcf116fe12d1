//! Core types for the points ledger
//!
//! All persisted types serialize with bincode. Balances and deltas are
//! plain `i64` points.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, externally assigned user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether the identifier is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user as seen by the command layer: identity plus last-seen display name.
///
/// The name is carried for display only and never used to look anything up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Stable identifier
    pub id: UserId,
    /// Display name at the time of the command
    pub name: String,
}

impl UserRef {
    /// Create new user reference
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Balance record for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account key
    pub id: UserId,

    /// Last-seen display name (denormalized)
    pub display_name: String,

    /// Current balance; may be negative after a debit
    pub balance: i64,

    /// Last modification (seconds since Unix epoch)
    pub last_modified: i64,

    /// Insertion order, assigned when the account is first written
    pub ordinal: u64,
}

/// What kind of staff action produced a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Points added
    Credit,
    /// Points removed
    Debit,
    /// Balance overwritten
    Set {
        /// Balance before the set
        from: i64,
        /// Balance after the set
        to: i64,
    },
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Credit => write!(f, "credit"),
            EntryKind::Debit => write!(f, "debit"),
            EntryKind::Set { from, to } => write!(f, "set {} -> {}", from, to),
        }
    }
}

/// History entry before storage assigns its sequence id and chain link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    /// Target account
    pub account_id: UserId,
    /// Acting staff member id
    pub actor_id: UserId,
    /// Acting staff member display name (denormalized)
    pub actor_name: String,
    /// Signed delta
    pub amount: i64,
    /// Action kind
    pub kind: EntryKind,
    /// Free-text reason
    pub reason: Option<String>,
    /// Seconds since Unix epoch
    pub timestamp: i64,
}

/// Immutable audit record of one balance change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Storage-assigned sequence id, never reused
    pub seq: u64,

    /// Target account
    pub account_id: UserId,

    /// Acting staff member id
    pub actor_id: UserId,

    /// Acting staff member display name (denormalized)
    pub actor_name: String,

    /// Signed delta; zero only for a set that did not change the balance
    pub amount: i64,

    /// Action kind
    pub kind: EntryKind,

    /// Free-text reason
    pub reason: Option<String>,

    /// Seconds since Unix epoch
    pub timestamp: i64,

    /// Hash of the previous entry for the same account (zero for the first)
    pub prev_hash: [u8; 32],

    /// Hash of this entry's canonical bytes
    pub hash: [u8; 32],
}

impl HistoryEntry {
    /// Canonical bytes covered by the chain hash (everything except `hash`)
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        let bytes = bincode::serialize(&(
            self.seq,
            &self.account_id,
            &self.actor_id,
            &self.actor_name,
            self.amount,
            &self.kind,
            &self.reason,
            self.timestamp,
            &self.prev_hash,
        ))?;
        Ok(bytes)
    }
}

/// Result of a `set_balance` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOutcome {
    /// Balance before the set (0 for a new account)
    pub old_balance: i64,
    /// Balance after the set
    pub new_balance: i64,
}

/// Ledger-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Accounts whose balance is above zero
    pub accounts_with_positive_balance: u64,
    /// Sum of every account balance
    pub total_points: i64,
    /// Number of history entries ever written
    pub total_history_entries: u64,
}

/// On-disk footprint of the database directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Bytes in SST files
    pub sst_bytes: u64,
    /// Bytes in every file, including the WAL and manifests
    pub total_bytes: u64,
}

/// Outcome of re-checking one account against its history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Audited account
    pub account_id: UserId,
    /// Stored balance (0 if the account does not exist)
    pub balance: i64,
    /// Sum of every history amount for the account
    pub history_sum: i64,
    /// Number of history entries
    pub entries: u64,
    /// `balance == history_sum`
    pub reconciled: bool,
    /// Every entry hashes correctly and links to its predecessor
    pub chain_intact: bool,
}

impl AuditReport {
    /// Both checks passed
    pub fn is_clean(&self) -> bool {
        self.reconciled && self.chain_intact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_from_u64() {
        let id = UserId::from(123456789012345678u64);
        assert_eq!(id.as_str(), "123456789012345678");
    }

    #[test]
    fn test_entry_kind_display() {
        assert_eq!(EntryKind::Credit.to_string(), "credit");
        assert_eq!(EntryKind::Set { from: 5, to: 10 }.to_string(), "set 5 -> 10");
    }

    #[test]
    fn test_canonical_bytes_exclude_hash() {
        let mut entry = HistoryEntry {
            seq: 1,
            account_id: UserId::new("u1"),
            actor_id: UserId::new("staff"),
            actor_name: "Staff".into(),
            amount: 10,
            kind: EntryKind::Credit,
            reason: None,
            timestamp: 1_700_000_000,
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
        };
        let before = entry.canonical_bytes().unwrap();
        entry.hash = [7u8; 32];
        assert_eq!(before, entry.canonical_bytes().unwrap());

        entry.amount = 11;
        assert_ne!(before, entry.canonical_bytes().unwrap());
    }
}
