// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use capsule::capsule::format::DEFAULT_PAYLOAD_WRAP;
use capsule::capsule::{Capsule, Keyring, MintRequest, SigningKeyPair, mint};
use capsule::FileLedger;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A signer, a keyring trusting it, and a file ledger in a temp dir.
///
/// Keep `dir` alive for the duration of the test.
pub struct Fixture {
    pub dir: TempDir,
    pub key: SigningKeyPair,
    pub keyring: Keyring,
    pub ledger: FileLedger,
}

pub fn setup() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let key = SigningKeyPair::generate().with_key_id("test-signer");
    let keyring = keyring_for(&key);
    let ledger = FileLedger::new(dir.path().join("ledger.ndjson"));
    Fixture {
        dir,
        key,
        keyring,
        ledger,
    }
}

pub fn keyring_for(key: &SigningKeyPair) -> Keyring {
    let mut keyring = Keyring::new();
    keyring
        .add_base64(&key.public_key_base64(), key.key_id())
        .unwrap();
    keyring
}

impl Fixture {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Mint a capsule into the fixture's ledger
    pub fn mint(&self, payload: &[u8], request: &MintRequest) -> Capsule {
        mint(payload, request, &self.ledger, &self.key, DEFAULT_PAYLOAD_WRAP).unwrap()
    }

    /// Mint a capsule and write it to `<dir>/<name>`
    pub fn mint_to_file(&self, payload: &[u8], name: &str) -> (Capsule, PathBuf) {
        let capsule = self.mint(payload, &MintRequest::new(name, "integration test"));
        let path = self.path(name);
        capsule.write_to(&path).unwrap();
        (capsule, path)
    }
}

/// Names of the entries in a directory, sorted
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
