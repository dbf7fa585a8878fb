// src/capsule/provenance.rs
//! Minting environment facts recorded in `provenance`
//!
//! Informational only: verifiers never check these values.

use std::collections::BTreeMap;
use std::fs;

/// Tool identifier recorded in every capsule
pub fn tool() -> String {
    format!("capsule/{}", env!("CARGO_PKG_VERSION"))
}

/// Collect `tool`, `host` and `signer`, then merge `extra` on top
pub fn collect(signer: Option<&str>, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut provenance = BTreeMap::new();
    provenance.insert("tool".to_string(), tool());
    if let Some(host) = hostname() {
        provenance.insert("host".to_string(), host);
    }
    if let Some(signer) = signer {
        provenance.insert("signer".to_string(), signer.to_string());
    }
    for (key, value) in extra {
        provenance.insert(key.clone(), value.clone());
    }
    provenance
}

fn hostname() -> Option<String> {
    fs::read_to_string("/etc/hostname")
        .ok()
        .and_then(|s| clean(&s))
        .or_else(|| std::env::var("HOSTNAME").ok().and_then(|s| clean(&s)))
}

fn clean(raw: &str) -> Option<String> {
    let host = raw.trim();
    if host.is_empty() || host.chars().any(char::is_control) {
        None
    } else {
        Some(host.to_string())
    }
}
