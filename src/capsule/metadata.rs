// src/capsule/metadata.rs
//! Capsule metadata envelope
//!
//! The metadata is the descriptive half of a capsule. It is sealed by
//! `self_hash`, a digest over the canonical encoding of every other field,
//! and then covered by the detached signature as part of the signed region.

use crate::capsule::encoder;
use crate::error::{Error, Result};
use crate::hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encoding of the embedded payload block
pub const PAYLOAD_ENCODING: &str = "base64";

/// Entry kind for payloads executed directly
pub const ENTRY_KIND_EXEC: &str = "exec";

/// Description of the embedded payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadDescriptor {
    /// Block encoding, always [`PAYLOAD_ENCODING`]
    pub encoding: String,
    /// How the payload is launched: `exec` or an interpreter name such as `sh`
    pub entry_kind: String,
    /// SHA-256 of the decoded payload bytes
    pub sha256: String,
    /// Decoded payload size in bytes
    pub size: u64,
}

impl PayloadDescriptor {
    /// Describe a payload
    pub fn describe(payload: &[u8], entry_kind: &str) -> Self {
        Self {
            encoding: PAYLOAD_ENCODING.to_string(),
            entry_kind: entry_kind.to_string(),
            sha256: hash::sha256(payload),
            size: payload.len() as u64,
        }
    }

    /// Check decoded payload bytes against this descriptor
    pub fn check(&self, payload: &[u8]) -> Result<()> {
        if self.size != payload.len() as u64 {
            return Err(Error::HashMismatch {
                field: "payload size",
                expected: self.size.to_string(),
                actual: payload.len().to_string(),
            });
        }
        hash::verify_sha256(payload, &self.sha256, "payload sha256")
    }

    /// Whether the payload is executed without an interpreter
    pub fn is_exec(&self) -> bool {
        self.entry_kind == ENTRY_KIND_EXEC
    }
}

/// Metadata embedded in every capsule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapsuleMetadata {
    /// Unique per mint, immutable once signed
    pub capsule_id: String,
    pub title: String,
    pub purpose: String,
    /// Groups capsules minted in one batch
    pub session_id: String,
    /// Mint time, RFC 3339 UTC with second precision
    pub date_utc: String,
    /// Ledger tip at mint time, or `genesis`
    pub chain_prev: String,
    /// Digest of the batch manifest this capsule belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,
    /// Minting environment facts; informational only
    #[serde(default)]
    pub provenance: BTreeMap<String, String>,
    pub payload_descriptor: PayloadDescriptor,
    /// Digest of the canonical encoding of all other fields
    #[serde(default)]
    pub self_hash: String,
}

impl CapsuleMetadata {
    /// Recompute the digest over every field except `self_hash`
    pub fn compute_self_hash(&self) -> Result<String> {
        let canonical = encoder::canonical_bytes(self)?;
        Ok(hash::sha256(&canonical))
    }

    /// Fill in `self_hash`; must be the last mutation before packaging
    pub fn seal(&mut self) -> Result<()> {
        self.self_hash = self.compute_self_hash()?;
        Ok(())
    }

    /// Check that the embedded `self_hash` matches a fresh recomputation
    pub fn verify_self_hash(&self) -> Result<()> {
        let actual = self.compute_self_hash()?;
        if actual == self.self_hash {
            Ok(())
        } else {
            Err(Error::HashMismatch {
                field: "self_hash",
                expected: self.self_hash.clone(),
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::GENESIS;

    fn sample() -> CapsuleMetadata {
        CapsuleMetadata {
            capsule_id: "cap-0001".into(),
            title: "Icon pack".into(),
            purpose: "Render icons into out_dir".into(),
            session_id: "session-a".into(),
            date_utc: "2026-01-02T03:04:05Z".into(),
            chain_prev: GENESIS.into(),
            manifest_hash: None,
            provenance: BTreeMap::from([("tool".to_string(), "capsule/0.1.0".to_string())]),
            payload_descriptor: PayloadDescriptor::describe(b"echo hi", "sh"),
            self_hash: String::new(),
        }
    }

    #[test]
    fn test_seal_and_verify() {
        let mut meta = sample();
        meta.seal().unwrap();
        assert!(hash::is_digest(&meta.self_hash));
        meta.verify_self_hash().unwrap();
    }

    #[test]
    fn test_self_hash_ignores_itself() {
        let mut meta = sample();
        let before = meta.compute_self_hash().unwrap();
        meta.self_hash = "anything".into();
        assert_eq!(meta.compute_self_hash().unwrap(), before);
    }

    #[test]
    fn test_any_field_change_breaks_seal() {
        let mut meta = sample();
        meta.seal().unwrap();

        let mut tampered = meta.clone();
        tampered.purpose.push('!');
        assert!(matches!(
            tampered.verify_self_hash(),
            Err(Error::HashMismatch { field: "self_hash", .. })
        ));

        let mut tampered = meta.clone();
        tampered.provenance.insert("host".into(), "elsewhere".into());
        assert!(tampered.verify_self_hash().is_err());

        let mut tampered = meta;
        tampered.payload_descriptor.size += 1;
        assert!(tampered.verify_self_hash().is_err());
    }

    #[test]
    fn test_payload_descriptor_check() {
        let desc = PayloadDescriptor::describe(b"echo hi", "sh");
        assert_eq!(desc.size, 7);
        assert_eq!(desc.encoding, PAYLOAD_ENCODING);
        assert!(!desc.is_exec());
        desc.check(b"echo hi").unwrap();
        assert!(matches!(
            desc.check(b"echo ho"),
            Err(Error::HashMismatch { field: "payload sha256", .. })
        ));
        assert!(matches!(
            desc.check(b"echo"),
            Err(Error::HashMismatch { field: "payload size", .. })
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["extra"] = serde_json::json!("x");
        assert!(serde_json::from_value::<CapsuleMetadata>(value).is_err());
    }
}
