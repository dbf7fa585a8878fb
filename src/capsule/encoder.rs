// src/capsule/encoder.rs
//! Canonical metadata encoding
//!
//! The canonical form is compact JSON (no insignificant whitespace) with
//! object keys sorted lexicographically at every depth. Keys are sorted
//! here, independent of `serde_json`'s `preserve_order` feature.
//!
//! Two encodings are produced from the same metadata:
//! - [`canonical_bytes`]: every field except `self_hash`; the hashing input
//! - [`sealed_bytes`]: every field including `self_hash`; the metadata line
//!   written into the capsule

use crate::capsule::metadata::CapsuleMetadata;
use crate::error::{Error, Result};
use crate::hash;
use crate::ledger::GENESIS;
use serde::Serialize;
use serde_json::{Map, Value};

/// Canonical encoding of metadata without `self_hash`
pub fn canonical_bytes(meta: &CapsuleMetadata) -> Result<Vec<u8>> {
    validate(meta)?;
    let mut value = serde_json::to_value(meta)?;
    if let Value::Object(map) = &mut value {
        map.remove("self_hash");
    }
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

/// Canonical encoding of metadata including `self_hash`
pub fn sealed_bytes(meta: &CapsuleMetadata) -> Result<Vec<u8>> {
    validate(meta)?;
    if !hash::is_digest(&meta.self_hash) {
        return Err(Error::Encoding(format!(
            "self_hash is not a sha256 digest: {:?}",
            meta.self_hash
        )));
    }
    canonical_json(meta)
}

/// Canonical encoding of any serializable value
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

/// Decode a metadata line read from a capsule
///
/// The line must be UTF-8, must parse as metadata, and must be byte-identical
/// to its own canonical re-encoding.
pub fn decode_sealed(line: &[u8]) -> Result<CapsuleMetadata> {
    let text = std::str::from_utf8(line)
        .map_err(|e| Error::Encoding(format!("metadata is not valid UTF-8: {}", e)))?;
    let meta: CapsuleMetadata = serde_json::from_str(text)
        .map_err(|e| Error::malformed(format!("metadata block is not valid metadata JSON: {}", e)))?;
    let canonical = sealed_bytes(&meta)?;
    if canonical != line {
        return Err(Error::malformed("metadata block is not in canonical form"));
    }
    Ok(meta)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Reject data the canonical form cannot carry unambiguously
fn validate(meta: &CapsuleMetadata) -> Result<()> {
    check_identifier("capsule_id", &meta.capsule_id)?;
    check_identifier("session_id", &meta.session_id)?;

    check_text("title", &meta.title)?;
    check_text("purpose", &meta.purpose)?;
    check_text("date_utc", &meta.date_utc)?;
    check_text("payload_descriptor.encoding", &meta.payload_descriptor.encoding)?;
    check_identifier("payload_descriptor.entry_kind", &meta.payload_descriptor.entry_kind)?;
    for (key, value) in &meta.provenance {
        check_text("provenance key", key)?;
        check_text("provenance value", value)?;
    }

    if meta.chain_prev != GENESIS && !hash::is_digest(&meta.chain_prev) {
        return Err(Error::Encoding(format!(
            "chain_prev must be a sha256 digest or \"{}\": {:?}",
            GENESIS, meta.chain_prev
        )));
    }
    if !hash::is_digest(&meta.payload_descriptor.sha256) {
        return Err(Error::Encoding("payload_descriptor.sha256 is not a sha256 digest".into()));
    }
    if let Some(manifest) = &meta.manifest_hash {
        if !hash::is_digest(manifest) {
            return Err(Error::Encoding("manifest_hash is not a sha256 digest".into()));
        }
    }

    Ok(())
}

fn check_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Encoding(format!("{} is empty", field)));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::Encoding(format!(
            "{} contains whitespace or control characters: {:?}",
            field, value
        )));
    }
    Ok(())
}

fn check_text(field: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(Error::Encoding(format!(
            "{} contains control characters: {:?}",
            field, value
        )));
    }
    Ok(())
}
