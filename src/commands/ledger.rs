// src/commands/ledger.rs

//! Ledger audit commands

use super::{load_keyring, open_ledger};
use crate::cli::TrustArgs;
use anyhow::{Context, Result};
use capsule::capsule::LocatedCapsule;
use capsule::ledger::{self, LedgerStore};
use capsule::Config;
use std::path::Path;

/// List ledger entries
pub fn cmd_ledger_show(config: &Config, ledger_path: Option<&Path>, json: bool) -> Result<()> {
    let store = open_ledger(config, ledger_path);
    let entries = store
        .entries()
        .with_context(|| format!("Failed to read ledger {}", store.path().display()))?;

    if json {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("Ledger {} is empty", store.path().display());
        return Ok(());
    }
    println!("{:>5}  {:<20}  {:<16}  CAPSULE", "INDEX", "TIMESTAMP", "ENTRY HASH");
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>5}  {:<20}  {:<16}  {}",
            i,
            entry.timestamp,
            &entry.entry_hash[..entry.entry_hash.len().min(16)],
            entry.capsule_id
        );
    }
    Ok(())
}

/// Audit the full chain
pub fn cmd_ledger_verify(config: &Config, ledger_path: Option<&Path>) -> Result<()> {
    let store = open_ledger(config, ledger_path);
    let entries = store
        .entries()
        .with_context(|| format!("Failed to read ledger {}", store.path().display()))?;

    let report = ledger::audit_chain(&entries);
    if let Some(broken) = &report.first_break {
        println!(
            "[FAILED] {}: entry {} of {}",
            store.path().display(),
            broken.index,
            report.total_entries
        );
        println!("  {}", broken.reason);
        return report.into_result().map_err(anyhow::Error::from);
    }

    println!(
        "[OK] {}: {} entries, tip {}",
        store.path().display(),
        report.total_entries,
        ledger::tip(&entries)
    );
    Ok(())
}

/// Print the chain tip
pub fn cmd_ledger_tip(config: &Config, ledger_path: Option<&Path>) -> Result<()> {
    let store = open_ledger(config, ledger_path);
    println!("{}", store.tip()?);
    Ok(())
}

/// Verify a capsule and locate it in the ledger
pub fn cmd_ledger_check(
    config: &Config,
    capsule: &Path,
    trust: &TrustArgs,
    ledger_path: Option<&Path>,
) -> Result<()> {
    let keyring = load_keyring(config, &trust.keys, &trust.files)?;
    let verified = LocatedCapsule::open(capsule)?.verify(&keyring)?;
    let meta = verified.metadata();

    let store = open_ledger(config, ledger_path);
    let entries = store.entries()?;
    let Some((index, entry)) = ledger::locate_capsule(&entries, meta)? else {
        anyhow::bail!(
            "Capsule {} is not recorded in ledger {}",
            meta.capsule_id,
            store.path().display()
        );
    };

    // The chain leading up to the entry must be intact
    ledger::audit_chain(&entries[..=index]).into_result()?;

    println!("[OK] {} is ledger entry {}", meta.capsule_id, index);
    println!("  prev_hash:  {}", entry.prev_hash);
    println!("  entry_hash: {}", entry.entry_hash);
    println!("  recorded:   {}", entry.timestamp);
    Ok(())
}
