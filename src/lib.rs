// src/lib.rs

//! Capsule: signed, self-verifying executable artifacts
//!
//! A capsule bundles canonical metadata, a base64 payload and a detached
//! Ed25519 signature in one text file. Every mint is recorded in a
//! hash-chained, append-only ledger so a capsule's position and integrity can
//! be audited independently of the file itself.
//!
//! # Architecture
//!
//! - [`capsule`]: container format, canonical encoding, signing, verification,
//!   minting and payload execution
//! - [`ledger`]: chain entries, validation and pluggable storage
//! - [`hash`]: SHA-256 content addressing
//! - [`config`]: TOML configuration

pub mod capsule;
pub mod config;
mod error;
pub mod hash;
pub mod ledger;

pub use capsule::{
    Capsule, CapsuleMetadata, ExecutionResult, Keyring, MintRequest, RunOptions, SigningKeyPair,
    VerificationResult, VerifiedCapsule,
};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{FileLedger, GENESIS, LedgerEntry, LedgerState, LedgerStore, MemoryLedger};
