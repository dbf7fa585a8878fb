// src/ledger/mod.rs

//! Hash-chained capsule ledger
//!
//! The ledger is an append-only sequence of [`LedgerEntry`] values, one per
//! minted capsule. Each entry links to its predecessor through `prev_hash`,
//! which must equal the predecessor's `entry_hash`; the first entry links to
//! [`GENESIS`]. The chain tip is the `entry_hash` of the last entry.
//!
//! ```text
//! genesis <- A.prev_hash   A.entry_hash <- B.prev_hash   B.entry_hash = tip
//! ```
//!
//! Storage is pluggable through [`LedgerStore`]: [`MemoryLedger`] keeps the
//! chain in memory, [`FileLedger`] keeps it in an NDJSON file guarded by an
//! exclusive lock.

pub mod chain;
mod lock;
mod store;

pub use chain::{
    BreakReason, ChainBreak, ChainReport, append, append_entry, audit_chain, locate_capsule, tip,
    validate_chain,
};
pub use lock::LedgerLock;
pub use store::{FileLedger, LedgerStore, MemoryLedger, parse_entries};

use crate::capsule::CapsuleMetadata;
use crate::error::Result;
use crate::hash::Hasher;
use serde::{Deserialize, Serialize};

/// Tip of an empty ledger and `prev_hash` of the first entry
pub const GENESIS: &str = "genesis";

/// Current time as an RFC 3339 UTC string with second precision
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Digest binding a ledger entry's body
///
/// `SHA256(timestamp "\n" capsule_id "\n" self_hash "\n" prev_hash)`
pub fn entry_hash(timestamp: &str, capsule_id: &str, self_hash: &str, prev_hash: &str) -> String {
    let mut hasher = Hasher::new();
    for (i, part) in [timestamp, capsule_id, self_hash, prev_hash].iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(part.as_bytes());
    }
    hasher.finalize()
}

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerEntry {
    pub timestamp: String,
    pub capsule_id: String,
    /// `self_hash` of the minted capsule's metadata
    pub self_hash: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl LedgerEntry {
    /// Build an entry and compute its `entry_hash`
    pub fn new(timestamp: &str, capsule_id: &str, self_hash: &str, prev_hash: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            capsule_id: capsule_id.to_string(),
            self_hash: self_hash.to_string(),
            prev_hash: prev_hash.to_string(),
            entry_hash: entry_hash(timestamp, capsule_id, self_hash, prev_hash),
        }
    }

    /// Entry recording a sealed capsule, linked to its `chain_prev`
    pub fn for_capsule(meta: &CapsuleMetadata, timestamp: &str) -> Self {
        Self::new(timestamp, &meta.capsule_id, &meta.self_hash, &meta.chain_prev)
    }

    /// Recompute `entry_hash` from the other fields
    pub fn compute_entry_hash(&self) -> String {
        entry_hash(&self.timestamp, &self.capsule_id, &self.self_hash, &self.prev_hash)
    }
}

/// In-memory ledger contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    entries: Vec<LedgerEntry>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `entry_hash` of the last entry, or [`GENESIS`]
    pub fn tip(&self) -> String {
        chain::tip(&self.entries)
    }

    /// Append an entry linked to the current tip; returns the new tip
    ///
    /// A capsule id that is already recorded is rejected.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<String> {
        let new_tip = chain::append_entry(&self.entries, &entry)?;
        self.entries.push(entry);
        Ok(new_tip)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash;

    #[test]
    fn test_entry_hash_layout() {
        let expected = hash::sha256(b"2026-01-01T00:00:00Z\ncap-a\nabc\ngenesis");
        assert_eq!(entry_hash("2026-01-01T00:00:00Z", "cap-a", "abc", GENESIS), expected);
    }

    #[test]
    fn test_entry_hash_fields_do_not_run_together() {
        assert_ne!(entry_hash("t", "ab", "c", GENESIS), entry_hash("t", "a", "bc", GENESIS));
    }

    #[test]
    fn test_state_append_moves_tip() {
        let mut state = LedgerState::new();
        assert_eq!(state.tip(), GENESIS);

        let a = LedgerEntry::new("2026-01-01T00:00:00Z", "a", &hash::sha256(b"a"), GENESIS);
        let tip = state.append(a.clone()).unwrap();
        assert_eq!(tip, a.entry_hash);
        assert_eq!(state.tip(), a.entry_hash);

        let b = LedgerEntry::new("2026-01-01T00:00:01Z", "b", &hash::sha256(b"b"), &tip);
        state.append(b).unwrap();
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_state_rejects_stale_entry() {
        let mut state = LedgerState::new();
        let a = LedgerEntry::new("t0", "a", &hash::sha256(b"a"), GENESIS);
        state.append(a).unwrap();

        let stale = LedgerEntry::new("t1", "b", &hash::sha256(b"b"), GENESIS);
        assert!(matches!(state.append(stale), Err(Error::ChainMismatch { .. })));
        assert_eq!(state.len(), 1);
    }
}
