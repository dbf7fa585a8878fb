// src/ledger/chain.rs

//! Chain operations over ordered ledger entries
//!
//! [`validate_chain`] checks linkage only: every `prev_hash` equals the
//! previous `entry_hash` and the first equals [`GENESIS`]. [`audit_chain`]
//! additionally recomputes each `entry_hash` and rejects a capsule id that
//! appears twice.

use super::{GENESIS, LedgerEntry};
use crate::capsule::CapsuleMetadata;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fmt;

/// Append check: `entry` must link to `current_tip`
///
/// Returns the new tip. Nothing is mutated; callers push the entry only
/// after this succeeds.
pub fn append(entry: &LedgerEntry, current_tip: &str) -> Result<String> {
    if entry.prev_hash != current_tip {
        return Err(Error::ChainMismatch {
            expected: current_tip.to_string(),
            actual: entry.prev_hash.clone(),
        });
    }
    let computed = entry.compute_entry_hash();
    if computed != entry.entry_hash {
        return Err(Error::HashMismatch {
            field: "entry_hash",
            expected: entry.entry_hash.clone(),
            actual: computed,
        });
    }
    Ok(entry.entry_hash.clone())
}

/// Append check against recorded entries
///
/// Like [`append`] with the tip of `entries`, and additionally rejects a
/// capsule id that is already recorded. Returns the new tip.
pub fn append_entry(entries: &[LedgerEntry], entry: &LedgerEntry) -> Result<String> {
    if entries.iter().any(|e| e.capsule_id == entry.capsule_id) {
        return Err(Error::DuplicateCapsuleId(entry.capsule_id.clone()));
    }
    append(entry, &tip(entries))
}

/// `entry_hash` of the last entry, or [`GENESIS`] when empty
pub fn tip(entries: &[LedgerEntry]) -> String {
    entries
        .last()
        .map(|e| e.entry_hash.clone())
        .unwrap_or_else(|| GENESIS.to_string())
}

/// Why a chain is broken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakReason {
    /// `prev_hash` does not match the previous `entry_hash`
    PrevHashMismatch { expected: String, actual: String },
    /// Stored `entry_hash` does not match the entry body
    EntryHashMismatch { stored: String, computed: String },
    /// Capsule id already recorded at an earlier index
    DuplicateCapsuleId(String),
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrevHashMismatch { expected, actual } => {
                write!(f, "prev_hash {} does not link to {}", actual, expected)
            }
            Self::EntryHashMismatch { stored, computed } => {
                write!(f, "entry_hash {} does not match body digest {}", stored, computed)
            }
            Self::DuplicateCapsuleId(id) => write!(f, "capsule {} recorded twice", id),
        }
    }
}

/// First broken entry in a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    /// Zero-based index of the offending entry
    pub index: usize,
    pub reason: BreakReason,
}

/// Result of walking a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Total number of entries
    pub total_entries: usize,
    /// Entries checked before the first break
    pub verified_entries: usize,
    pub first_break: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.first_break.is_none()
    }

    /// Index of the first invalid entry
    pub fn broken_at(&self) -> Option<usize> {
        self.first_break.as_ref().map(|b| b.index)
    }

    /// Convert a broken report into a chain error
    pub fn into_result(self) -> Result<()> {
        match self.first_break {
            None => Ok(()),
            Some(ChainBreak {
                reason: BreakReason::PrevHashMismatch { expected, actual },
                ..
            }) => Err(Error::ChainMismatch { expected, actual }),
            Some(ChainBreak { index, reason }) => Err(Error::LedgerCorrupt {
                line: index + 1,
                reason: reason.to_string(),
            }),
        }
    }

    fn broken(total: usize, index: usize, reason: BreakReason) -> Self {
        Self {
            total_entries: total,
            verified_entries: index,
            first_break: Some(ChainBreak { index, reason }),
        }
    }
}

/// Walk the chain checking linkage, stopping at the first break
pub fn validate_chain(entries: &[LedgerEntry]) -> ChainReport {
    walk(entries, false)
}

/// Full audit: linkage, recomputed `entry_hash`, unique capsule ids
pub fn audit_chain(entries: &[LedgerEntry]) -> ChainReport {
    walk(entries, true)
}

fn walk(entries: &[LedgerEntry], full: bool) -> ChainReport {
    let total = entries.len();
    let mut expected_prev = GENESIS.to_string();
    let mut seen = HashSet::new();

    for (i, entry) in entries.iter().enumerate() {
        if entry.prev_hash != expected_prev {
            return ChainReport::broken(
                total,
                i,
                BreakReason::PrevHashMismatch {
                    expected: expected_prev,
                    actual: entry.prev_hash.clone(),
                },
            );
        }
        if full {
            let computed = entry.compute_entry_hash();
            if computed != entry.entry_hash {
                return ChainReport::broken(
                    total,
                    i,
                    BreakReason::EntryHashMismatch {
                        stored: entry.entry_hash.clone(),
                        computed,
                    },
                );
            }
            if !seen.insert(entry.capsule_id.as_str()) {
                return ChainReport::broken(
                    total,
                    i,
                    BreakReason::DuplicateCapsuleId(entry.capsule_id.clone()),
                );
            }
        }
        expected_prev = entry.entry_hash.clone();
    }

    ChainReport {
        total_entries: total,
        verified_entries: total,
        first_break: None,
    }
}

/// Find the ledger entry recording a capsule
///
/// Returns `Ok(None)` if the capsule is not in the ledger. An entry that
/// exists but disagrees with the metadata's `self_hash` or `chain_prev` is
/// an error.
pub fn locate_capsule<'a>(
    entries: &'a [LedgerEntry],
    meta: &CapsuleMetadata,
) -> Result<Option<(usize, &'a LedgerEntry)>> {
    let Some((index, entry)) = entries
        .iter()
        .enumerate()
        .find(|(_, e)| e.capsule_id == meta.capsule_id)
    else {
        return Ok(None);
    };

    if entry.self_hash != meta.self_hash {
        return Err(Error::HashMismatch {
            field: "ledger self_hash",
            expected: entry.self_hash.clone(),
            actual: meta.self_hash.clone(),
        });
    }
    if entry.prev_hash != meta.chain_prev {
        return Err(Error::ChainMismatch {
            expected: entry.prev_hash.clone(),
            actual: meta.chain_prev.clone(),
        });
    }
    Ok(Some((index, entry)))
}
