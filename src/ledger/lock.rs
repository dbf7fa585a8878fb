// src/ledger/lock.rs

//! Exclusive lock serializing ledger writers
//!
//! Held for the whole read-tip → append critical section of a mint, so two
//! writers can never both link to the same tip. The lock lives in a sibling
//! file (`ledger.ndjson.lock`) because the ledger itself is replaced by
//! rename on every commit.

use crate::error::Result;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive `flock` on a ledger's lock file, released on drop
pub struct LedgerLock {
    /// Kept open to maintain the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl LedgerLock {
    /// Lock file path for a ledger
    pub fn path_for(ledger: &Path) -> PathBuf {
        let mut name = OsString::from(ledger.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock for `ledger`, blocking until available
    pub fn acquire(ledger: &Path) -> Result<Self> {
        let path = Self::path_for(ledger);
        let file = open_lock_file(&path)?;
        file.lock_exclusive()?;
        debug!("Acquired ledger lock at {:?}", path);
        Ok(Self { file, path })
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `Ok(None)` if another writer holds it.
    pub fn try_acquire(ledger: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(ledger);
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired ledger lock at {:?}", path);
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!("Ledger lock already held at {:?}", path);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        // Lock is released when the file is closed
        debug!("Released ledger lock at {:?}", self.path);
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    // Never truncate: the file may be locked by another writer
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?)
}
