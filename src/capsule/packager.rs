// src/capsule/packager.rs
//! Capsule minting
//!
//! Minting runs entirely inside a ledger commit:
//!
//! 1. Describe the payload (`payload_descriptor`)
//! 2. Take the ledger tip as `chain_prev`
//! 3. Seal the metadata (`self_hash`)
//! 4. Render the metadata and payload blocks
//! 5. Sign the rendered region and attach the signature block
//! 6. Return the ledger entry, which the store appends as the new tip
//!
//! If any step fails the commit is abandoned and the ledger is unchanged.

use crate::capsule::encoder;
use crate::capsule::format::{self, CapsuleBody};
use crate::capsule::metadata::{CapsuleMetadata, PayloadDescriptor};
use crate::capsule::provenance;
use crate::capsule::signing::SigningKeyPair;
use crate::error::{Error, Result};
use crate::ledger::{self, LedgerEntry, LedgerStore};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Default entry kind for new capsules
pub const DEFAULT_ENTRY_KIND: &str = "sh";

/// Caller-supplied metadata for a new capsule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Generated (UUID v4) when absent
    pub capsule_id: Option<String>,
    pub title: String,
    pub purpose: String,
    /// Generated (UUID v4) when absent
    pub session_id: Option<String>,
    pub entry_kind: String,
    pub manifest_hash: Option<String>,
    /// Merged over the automatically collected provenance
    pub provenance: BTreeMap<String, String>,
}

impl MintRequest {
    pub fn new(title: &str, purpose: &str) -> Self {
        Self {
            capsule_id: None,
            title: title.to_string(),
            purpose: purpose.to_string(),
            session_id: None,
            entry_kind: DEFAULT_ENTRY_KIND.to_string(),
            manifest_hash: None,
            provenance: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.capsule_id = Some(id.to_string());
        self
    }

    pub fn with_session(mut self, session: &str) -> Self {
        self.session_id = Some(session.to_string());
        self
    }

    pub fn with_entry_kind(mut self, kind: &str) -> Self {
        self.entry_kind = kind.to_string();
        self
    }

    pub fn with_manifest_hash(mut self, digest: &str) -> Self {
        self.manifest_hash = Some(digest.to_string());
        self
    }

    pub fn with_provenance(mut self, key: &str, value: &str) -> Self {
        self.provenance.insert(key.to_string(), value.to_string());
        self
    }

    /// Check that this request encodes, without touching a ledger
    ///
    /// Builds the metadata a mint would produce against a genesis tip, so
    /// any field a mint would reject is reported here first.
    pub fn validate(&self, payload: &[u8], key: &SigningKeyPair) -> Result<()> {
        let metadata = self.metadata(payload, ledger::GENESIS, &ledger::utc_timestamp(), key.key_id());
        encoder::canonical_bytes(&metadata).map(|_| ())
    }

    /// Unsealed metadata for this request at the given tip and time
    fn metadata(
        &self,
        payload: &[u8],
        chain_prev: &str,
        date_utc: &str,
        signer: Option<&str>,
    ) -> CapsuleMetadata {
        CapsuleMetadata {
            capsule_id: self
                .capsule_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title: self.title.clone(),
            purpose: self.purpose.clone(),
            session_id: self
                .session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            date_utc: date_utc.to_string(),
            chain_prev: chain_prev.to_string(),
            manifest_hash: self.manifest_hash.clone(),
            provenance: provenance::collect(signer, &self.provenance),
            payload_descriptor: PayloadDescriptor::describe(payload, &self.entry_kind),
            self_hash: String::new(),
        }
    }
}

/// A minted capsule and the ledger entry recording it
#[derive(Debug, Clone)]
pub struct Capsule {
    bytes: Vec<u8>,
    metadata: CapsuleMetadata,
    ledger_entry: LedgerEntry,
}

impl Capsule {
    /// The complete capsule file
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn metadata(&self) -> &CapsuleMetadata {
        &self.metadata
    }

    pub fn ledger_entry(&self) -> &LedgerEntry {
        &self.ledger_entry
    }

    /// Write the capsule file atomically
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Render, sign and armor a capsule from sealed metadata
///
/// Performs no checks beyond canonical encoding, so it can also produce
/// capsules whose hashes do not match their contents.
pub fn assemble(
    meta: &CapsuleMetadata,
    payload: &[u8],
    key: &SigningKeyPair,
    wrap: usize,
) -> Result<Vec<u8>> {
    let body = CapsuleBody {
        metadata_line: encoder::sealed_bytes(meta)?,
        payload_b64: BASE64.encode(payload),
        wrap,
    };
    let region = body.render()?;
    let armor = key.sign(&region).to_armor()?;
    Ok(format::attach_signature(region, &armor))
}

/// Mint a capsule and record it in `ledger`
pub fn mint<S: LedgerStore>(
    payload: &[u8],
    request: &MintRequest,
    ledger: &S,
    key: &SigningKeyPair,
    wrap: usize,
) -> Result<Capsule> {
    let capsule = ledger.commit(|tip| {
        let date_utc = ledger::utc_timestamp();
        let mut metadata = request.metadata(payload, tip, &date_utc, key.key_id());
        metadata.seal()?;

        let bytes = assemble(&metadata, payload, key, wrap)?;
        let ledger_entry = LedgerEntry::for_capsule(&metadata, &date_utc);
        let capsule = Capsule {
            bytes,
            metadata,
            ledger_entry: ledger_entry.clone(),
        };
        Ok((capsule, ledger_entry))
    })?;

    info!(
        "Minted capsule {} ({} bytes payload), chain_prev {}",
        capsule.metadata.capsule_id, capsule.metadata.payload_descriptor.size, capsule.metadata.chain_prev
    );
    Ok(capsule)
}
