// src/ledger/store.rs

//! Ledger storage backends
//!
//! All writes go through [`LedgerStore::commit`], which hands the caller the
//! current tip under exclusive access and only records the returned entry if
//! it links to that tip under a capsule id not yet recorded. A closure that
//! fails leaves the ledger untouched, and nothing is committed on top of a
//! chain that fails [`chain::audit_chain`].

use super::chain;
use super::lock::LedgerLock;
use super::{LedgerEntry, LedgerState};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Append-only storage for ledger entries
pub trait LedgerStore {
    /// All entries in append order
    fn entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Current chain tip
    fn tip(&self) -> Result<String> {
        Ok(chain::tip(&self.entries()?))
    }

    /// Run `f` with the current tip and append the entry it returns
    ///
    /// Concurrent commits against the same ledger are serialized. The
    /// existing entries must pass [`chain::audit_chain`] before `f` runs, and
    /// the new entry is checked with [`chain::append_entry`] before anything
    /// is written.
    fn commit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&str) -> Result<(T, LedgerEntry)>;
}

/// Ledger held in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A panic inside a commit never leaves a half-appended entry
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerStore for MemoryLedger {
    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.lock().entries().to_vec())
    }

    fn commit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&str) -> Result<(T, LedgerEntry)>,
    {
        let mut state = self.lock();
        chain::audit_chain(state.entries()).into_result()?;
        let tip = state.tip();
        let (value, entry) = f(&tip)?;
        state.append(entry)?;
        Ok(value)
    }
}

/// Newline-delimited JSON ledger file
///
/// One entry per line in append order. Every commit rewrites the file
/// through a temp file in the same directory that is fsynced and renamed
/// over the ledger, so readers see either the old or the new contents.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw file contents; empty if the ledger does not exist yet
    fn read_raw(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        // Make the rename itself durable
        #[cfg(unix)]
        File::open(dir)?.sync_all()?;

        Ok(())
    }
}

/// Parse NDJSON ledger contents
///
/// Every line must be a complete entry terminated by `\n`; anything else is
/// [`Error::LedgerCorrupt`] with a 1-based line number.
pub fn parse_entries(raw: &[u8]) -> Result<Vec<LedgerEntry>> {
    let mut entries = Vec::new();
    if raw.is_empty() {
        return Ok(entries);
    }
    let text = std::str::from_utf8(raw).map_err(|e| Error::LedgerCorrupt {
        line: 1 + raw[..e.valid_up_to()].iter().filter(|&&b| b == b'\n').count(),
        reason: "invalid UTF-8".to_string(),
    })?;

    let body = text.strip_suffix('\n').ok_or_else(|| Error::LedgerCorrupt {
        line: text.split('\n').count(),
        reason: "unterminated final line".to_string(),
    })?;

    for (i, line) in body.split('\n').enumerate() {
        let entry = serde_json::from_str(line).map_err(|e| Error::LedgerCorrupt {
            line: i + 1,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

impl LedgerStore for FileLedger {
    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        parse_entries(&self.read_raw()?)
    }

    fn commit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&str) -> Result<(T, LedgerEntry)>,
    {
        let _lock = match LedgerLock::try_acquire(&self.path)? {
            Some(lock) => lock,
            None => {
                info!("Waiting for another writer to release {}", self.path.display());
                LedgerLock::acquire(&self.path)?
            }
        };

        let mut raw = self.read_raw()?;
        let entries = parse_entries(&raw)?;
        chain::audit_chain(&entries).into_result()?;
        let tip = chain::tip(&entries);
        debug!("Ledger {:?} tip {} ({} entries)", self.path, tip, entries.len());

        let (value, entry) = f(&tip)?;
        chain::append_entry(&entries, &entry)?;

        serde_json::to_writer(&mut raw, &entry)?;
        raw.push(b'\n');
        self.write_atomic(&raw)?;

        info!(
            "Ledger commit: {} -> {}",
            entry.capsule_id, entry.entry_hash
        );
        Ok(value)
    }
}
