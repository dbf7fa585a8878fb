// src/commands/mod.rs
//! Command handlers for the capsule CLI

mod keys;
mod ledger;
mod mint;
mod verify;

pub use keys::cmd_keygen;
pub use ledger::{cmd_ledger_check, cmd_ledger_show, cmd_ledger_tip, cmd_ledger_verify};
pub use mint::{cmd_mint, cmd_mint_batch};
pub use verify::{cmd_meta, cmd_run, cmd_verify};

use anyhow::{Context, Result};
use capsule::{Config, FileLedger, Keyring, SigningKeyPair};
use std::path::{Path, PathBuf};

/// Keyring from config plus `--trust`/`--trust-file`
fn load_keyring(config: &Config, keys: &[String], files: &[PathBuf]) -> Result<Keyring> {
    let keyring = config
        .keyring(keys, files)
        .context("Failed to load trusted keys")?;
    if keyring.is_empty() {
        tracing::warn!("No trusted keys configured; every capsule will be rejected");
    }
    Ok(keyring)
}

/// Ledger from `--ledger` or config
fn open_ledger(config: &Config, ledger: Option<&Path>) -> FileLedger {
    FileLedger::new(ledger.unwrap_or(&config.ledger))
}

/// Signing key from `--key` or config
fn load_signing_key(config: &Config, key: Option<&Path>) -> Result<SigningKeyPair> {
    let Some(path) = key.or(config.signing_key.as_deref()) else {
        anyhow::bail!("No signing key: pass --key or set signing_key in the config file");
    };
    SigningKeyPair::load_from_file(path)
        .with_context(|| format!("Failed to load signing key {}", path.display()))
}
