// src/commands/verify.rs

//! Capsule consumer commands: run, verify, meta

use super::load_keyring;
use crate::cli::TrustArgs;
use anyhow::Result;
use capsule::Config;
use capsule::capsule::{runner, verify};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Verify a capsule and execute its payload
pub fn cmd_run(
    config: &Config,
    capsule: &Path,
    out_dir: &Path,
    trust: &TrustArgs,
    timeout: Option<u64>,
) -> Result<()> {
    let keyring = load_keyring(config, &trust.keys, &trust.files)?;
    let mut opts = config.run_options();
    if let Some(secs) = timeout {
        opts.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let result = runner::run(capsule, out_dir, &keyring, &opts)?;
    info!(
        "Capsule {} finished in {:?}",
        result.capsule_id, result.duration
    );
    Ok(())
}

/// Verify a capsule without running it
pub fn cmd_verify(config: &Config, capsule: &Path, trust: &TrustArgs, json: bool) -> Result<()> {
    let keyring = load_keyring(config, &trust.keys, &trust.files)?;

    match verify::verify(capsule, &keyring) {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                verify::print_result(&result);
            }
            Ok(())
        }
        Err(e) => {
            if !json {
                verify::print_rejection(capsule, &e);
            }
            Err(e.into())
        }
    }
}

/// Print a capsule's metadata without verifying it
pub fn cmd_meta(capsule: &Path) -> Result<()> {
    let metadata = verify::meta(capsule)?;
    println!("{}", metadata.to_json_pretty()?);
    eprintln!("note: metadata is unverified; run `capsule verify` before trusting it");
    Ok(())
}
