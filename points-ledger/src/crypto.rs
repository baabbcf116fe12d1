//! Hash chain over history entries
//!
//! Every account's history forms its own SHA-256 chain: each entry stores
//! the hash of the entry before it and a hash over its own canonical bytes.
//! Editing, dropping or reordering a stored entry breaks the chain.

use crate::types::HistoryEntry;
use crate::Result;
use sha2::{Digest, Sha256};

/// `prev_hash` of an account's first entry
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a history entry's canonical bytes
pub fn hash_entry(entry: &HistoryEntry) -> Result<[u8; 32]> {
    Ok(hash_bytes(&entry.canonical_bytes()?))
}

/// Link `entry` after `prev_hash` and fill in its own hash
pub fn seal_entry(entry: &mut HistoryEntry, prev_hash: [u8; 32]) -> Result<()> {
    entry.prev_hash = prev_hash;
    entry.hash = hash_entry(entry)?;
    Ok(())
}

/// Verify one account's entries, given in ascending sequence order.
///
/// Returns `false` on the first entry whose hash does not match its
/// content or whose `prev_hash` does not match the entry before it.
pub fn verify_chain(entries: &[HistoryEntry]) -> Result<bool> {
    let mut expected_prev = GENESIS_HASH;

    for entry in entries {
        if entry.prev_hash != expected_prev {
            tracing::warn!(seq = entry.seq, account = %entry.account_id, "History chain link broken");
            return Ok(false);
        }
        if hash_entry(entry)? != entry.hash {
            tracing::warn!(seq = entry.seq, account = %entry.account_id, "History entry hash mismatch");
            return Ok(false);
        }
        expected_prev = entry.hash;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryKind, UserId};

    fn entry(seq: u64, amount: i64) -> HistoryEntry {
        HistoryEntry {
            seq,
            account_id: UserId::new("pilot"),
            actor_id: UserId::new("staff"),
            actor_name: "Staff".into(),
            amount,
            kind: EntryKind::Credit,
            reason: Some("landing".into()),
            timestamp: 1_700_000_000 + seq as i64,
            prev_hash: GENESIS_HASH,
            hash: GENESIS_HASH,
        }
    }

    fn chain(len: u64) -> Vec<HistoryEntry> {
        let mut prev = GENESIS_HASH;
        (1..=len)
            .map(|seq| {
                let mut e = entry(seq, 10);
                seal_entry(&mut e, prev).unwrap();
                prev = e.hash;
                e
            })
            .collect()
    }

    #[test]
    fn test_hash_bytes_deterministic() {
        assert_eq!(hash_bytes(b"points"), hash_bytes(b"points"));
        assert_ne!(hash_bytes(b"points"), hash_bytes(b"point"));
    }

    #[test]
    fn test_valid_chain() {
        assert!(verify_chain(&chain(5)).unwrap());
        assert!(verify_chain(&[]).unwrap());
    }

    #[test]
    fn test_tampered_amount_detected() {
        let mut entries = chain(3);
        entries[1].amount = 1_000;
        assert!(!verify_chain(&entries).unwrap());
    }

    #[test]
    fn test_dropped_entry_detected() {
        let mut entries = chain(3);
        entries.remove(1);
        assert!(!verify_chain(&entries).unwrap());
    }
}
