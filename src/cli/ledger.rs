// src/cli/ledger.rs
//! Ledger audit commands

use super::TrustArgs;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// List ledger entries in append order
    Show {
        /// Ledger file (default: ledger from config)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Print entries as NDJSON
        #[arg(long)]
        json: bool,
    },

    /// Audit the whole chain: links, entry hashes, unique capsule ids
    Verify {
        /// Ledger file (default: ledger from config)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Print the current chain tip
    Tip {
        /// Ledger file (default: ledger from config)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Verify a capsule and check that the ledger records it consistently
    Check {
        /// Path to the capsule file
        capsule: PathBuf,

        #[command(flatten)]
        trust: TrustArgs,

        /// Ledger file (default: ledger from config)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
}
