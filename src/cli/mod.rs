// src/cli/mod.rs
//! CLI definitions for the capsule tool
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! Capsule commands:
//! - `run` - Verify, decode and execute a capsule's payload
//! - `verify` - Verify a capsule without executing it
//! - `meta` - Print a capsule's metadata (unverified)
//!
//! Authoring:
//! - `mint` / `mint-batch` - Create capsules and record them in the ledger
//! - `keygen` - Generate a signing key pair
//!
//! Audit:
//! - `ledger` - Inspect and validate the hash-chained ledger

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod ledger;

pub use ledger::LedgerCommands;

#[derive(Parser)]
#[command(name = "capsule")]
#[command(version)]
#[command(about = "Signed, self-verifying executable capsules with a hash-chained ledger", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $CAPSULE_CONFIG, then ~/.config/capsule/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Extra trusted keys on top of the configured keyring
#[derive(Args, Debug, Clone, Default)]
pub struct TrustArgs {
    /// Trust a base64 Ed25519 public key (repeatable)
    #[arg(long = "trust", value_name = "KEY")]
    pub keys: Vec<String>,

    /// Trust the public key in a key file (repeatable)
    #[arg(long = "trust-file", value_name = "PATH")]
    pub files: Vec<PathBuf>,
}

/// Signing key and ledger overrides for minting
#[derive(Args, Debug, Clone, Default)]
pub struct MintArgs {
    /// Private key file (default: signing_key from config)
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Ledger file (default: ledger from config)
    #[arg(long, value_name = "PATH")]
    pub ledger: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify a capsule, then execute its payload with OUT_DIR as argument
    Run {
        /// Path to the capsule file
        capsule: PathBuf,

        /// Directory passed to the payload (created if missing)
        #[arg(default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        trust: TrustArgs,

        /// Kill the payload after this many seconds (overrides config)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Verify a capsule's signature and hashes without running it
    Verify {
        /// Path to the capsule file
        capsule: PathBuf,

        #[command(flatten)]
        trust: TrustArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a capsule's metadata as JSON (unverified, informational only)
    Meta {
        /// Path to the capsule file
        capsule: PathBuf,
    },

    /// Mint a capsule from a payload file and record it in the ledger
    Mint {
        /// Payload file to embed
        payload: PathBuf,

        /// Capsule title
        #[arg(long)]
        title: String,

        /// What the payload does
        #[arg(long)]
        purpose: String,

        /// How the payload is launched: exec, or an interpreter name
        #[arg(long, default_value = "sh")]
        entry_kind: String,

        /// Capsule id (default: random UUID)
        #[arg(long)]
        id: Option<String>,

        /// Session id (default: random UUID)
        #[arg(long)]
        session: Option<String>,

        /// Digest of the batch manifest this capsule belongs to
        #[arg(long)]
        manifest_hash: Option<String>,

        /// Extra provenance entry (repeatable)
        #[arg(long = "prov", value_name = "KEY=VALUE")]
        provenance: Vec<String>,

        /// Output file (default: <capsule_id>.capsule)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        mint: MintArgs,
    },

    /// Mint every capsule listed in a batch file as one session
    MintBatch {
        /// Batch file (TOML)
        batch: PathBuf,

        /// Output directory for capsules and the manifest
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[command(flatten)]
        mint: MintArgs,
    },

    /// Generate an Ed25519 signing key pair
    Keygen {
        /// Output path base (creates .private and .public files)
        #[arg(short, long, default_value = "capsule-signing")]
        output: PathBuf,

        /// Key identifier recorded in signatures
        #[arg(long)]
        key_id: Option<String>,

        /// Overwrite existing key files
        #[arg(long)]
        force: bool,
    },

    /// Inspect and validate the ledger
    #[command(subcommand)]
    Ledger(LedgerCommands),
}
