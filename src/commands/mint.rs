// src/commands/mint.rs

//! Capsule authoring commands
//!
//! The ledger entry is committed before the capsule file is written. A
//! failed write leaves an entry whose capsule must be minted again.

use super::{load_signing_key, open_ledger};
use crate::cli::MintArgs;
use anyhow::{Context, Result};
use capsule::Config;
use capsule::capsule::{BatchFile, MintRequest, manifest, packager};
use std::fs;
use std::path::{Path, PathBuf};

/// Parse `KEY=VALUE` provenance arguments
fn parse_provenance(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| {
            let (key, value) = entry
                .split_once('=')
                .with_context(|| format!("Invalid provenance entry (expected KEY=VALUE): {}", entry))?;
            if key.is_empty() {
                anyhow::bail!("Invalid provenance entry (empty key): {}", entry);
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Mint one capsule from a payload file
#[allow(clippy::too_many_arguments)]
pub fn cmd_mint(
    config: &Config,
    payload_path: &Path,
    title: &str,
    purpose: &str,
    entry_kind: &str,
    id: Option<&str>,
    session: Option<&str>,
    manifest_hash: Option<&str>,
    provenance: &[String],
    output: Option<&Path>,
    args: &MintArgs,
) -> Result<()> {
    let payload = fs::read(payload_path)
        .with_context(|| format!("Failed to read payload {}", payload_path.display()))?;
    let key = load_signing_key(config, args.key.as_deref())?;
    let ledger = open_ledger(config, args.ledger.as_deref());

    let mut request = MintRequest::new(title, purpose).with_entry_kind(entry_kind);
    if let Some(id) = id {
        request = request.with_id(id);
    }
    if let Some(session) = session {
        request = request.with_session(session);
    }
    if let Some(digest) = manifest_hash {
        request = request.with_manifest_hash(digest);
    }
    for (k, v) in parse_provenance(provenance)? {
        request.provenance.insert(k, v);
    }

    let capsule = packager::mint(&payload, &request, &ledger, &key, config.format.payload_wrap)
        .context("Failed to mint capsule")?;

    let meta = capsule.metadata();
    let out_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.capsule", meta.capsule_id)));
    capsule
        .write_to(&out_path)
        .with_context(|| format!("Failed to write capsule {}", out_path.display()))?;

    println!("Minted capsule {}", meta.capsule_id);
    println!("  File:       {}", out_path.display());
    println!("  self_hash:  {}", meta.self_hash);
    println!("  chain_prev: {}", meta.chain_prev);
    println!("  Ledger tip: {}", capsule.ledger_entry().entry_hash);
    Ok(())
}

/// Mint every capsule of a batch file
///
/// The whole batch is checked before the first commit. Each capsule file is
/// written as soon as its entry is committed.
pub fn cmd_mint_batch(config: &Config, batch_path: &Path, output: &Path, args: &MintArgs) -> Result<()> {
    let batch = BatchFile::from_file(batch_path)
        .with_context(|| format!("Failed to load batch file {}", batch_path.display()))?;
    let key = load_signing_key(config, args.key.as_deref())?;
    let ledger = open_ledger(config, args.ledger.as_deref());

    let plan = manifest::plan_batch(&batch, &ledger, &key, config.format.payload_wrap)
        .context("Batch rejected, nothing was minted")?;

    fs::create_dir_all(output)?;
    let manifest_path = output.join(format!("{}.manifest.json", plan.manifest.session_id));
    fs::write(&manifest_path, plan.manifest.to_canonical_json()?)
        .with_context(|| format!("Failed to write manifest {}", manifest_path.display()))?;

    let outcome = plan
        .mint(&ledger, &key, |capsule| {
            let path = output.join(format!("{}.capsule", capsule.metadata().capsule_id));
            capsule.write_to(&path)?;
            println!("  {}", path.display());
            Ok(())
        })
        .context("Failed to mint batch")?;

    println!(
        "Minted {} capsules in session {}",
        outcome.capsules.len(),
        outcome.manifest.session_id
    );
    println!("  Manifest: {} ({})", manifest_path.display(), outcome.manifest_hash);
    Ok(())
}
