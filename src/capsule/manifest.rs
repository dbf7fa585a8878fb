// src/capsule/manifest.rs
//! Batch minting
//!
//! A batch file lists payloads to mint as one session:
//!
//! ```toml
//! session_id = "icons-2026-01"     # optional, generated if absent
//!
//! [[capsule]]
//! payload = "render.sh"            # relative to the batch file
//! title = "Render icons"
//! purpose = "Render the icon set into out_dir"
//! entry_kind = "sh"                # optional, default "sh"
//! id = "icons-render"              # optional, generated if absent
//! ```
//!
//! [`plan_batch`] reads every payload, builds a [`BatchManifest`] listing
//! every capsule and hashes it canonically, then checks each capsule's
//! metadata. Only then does [`BatchPlan::mint`] commit anything. The manifest
//! digest becomes `manifest_hash` in each capsule of the batch.

use crate::capsule::encoder;
use crate::capsule::format;
use crate::capsule::packager::{self, Capsule, DEFAULT_ENTRY_KIND, MintRequest};
use crate::capsule::signing::SigningKeyPair;
use crate::error::{Error, Result};
use crate::hash;
use crate::ledger::LedgerStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_entry_kind() -> String {
    DEFAULT_ENTRY_KIND.to_string()
}

/// Batch file contents
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "capsule", default)]
    pub capsules: Vec<BatchItem>,
}

/// One capsule in a batch file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchItem {
    pub payload: PathBuf,
    pub title: String,
    pub purpose: String,
    #[serde(default = "default_entry_kind")]
    pub entry_kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub provenance: BTreeMap<String, String>,
}

impl BatchFile {
    /// Parse a batch file, resolving payload paths against its directory
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut batch = Self::from_toml(&content)?;
        let base = path.parent().unwrap_or(Path::new("."));
        for item in &mut batch.capsules {
            if item.payload.is_relative() {
                item.payload = base.join(&item.payload);
            }
        }
        Ok(batch)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let batch: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid batch file: {}", e)))?;
        if batch.capsules.is_empty() {
            return Err(Error::Config("batch file lists no capsules".into()));
        }
        Ok(batch)
    }
}

/// Ordered list of the capsules minted in one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub session_id: String,
    pub items: Vec<ManifestItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub capsule_id: String,
    pub title: String,
    pub payload_sha256: String,
}

impl BatchManifest {
    /// Digest of the canonical encoding
    pub fn digest(&self) -> Result<String> {
        Ok(hash::sha256(&encoder::canonical_json(self)?))
    }

    /// Canonical JSON as written next to the capsules
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        encoder::canonical_json(self)
    }
}

/// Result of minting a batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub manifest: BatchManifest,
    pub manifest_hash: String,
    pub capsules: Vec<Capsule>,
}

/// A batch that is ready to mint
///
/// Every payload has been read and every capsule's metadata encoded, so a
/// mint can only fail on the ledger or on signing.
#[derive(Debug)]
pub struct BatchPlan {
    pub manifest: BatchManifest,
    pub manifest_hash: String,
    requests: Vec<(MintRequest, Vec<u8>)>,
    wrap: usize,
}

/// Read and check a batch without committing anything
///
/// Rejects unreadable payloads, ids repeated within the batch or already
/// recorded in `ledger`, a bad wrap width, and any metadata that does not
/// encode.
pub fn plan_batch<S: LedgerStore>(
    batch: &BatchFile,
    ledger: &S,
    key: &SigningKeyPair,
    wrap: usize,
) -> Result<BatchPlan> {
    format::check_wrap(wrap)?;
    let session_id = batch
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let recorded: HashSet<String> = ledger
        .entries()?
        .into_iter()
        .map(|e| e.capsule_id)
        .collect();
    let mut seen = HashSet::new();
    let mut planned = Vec::with_capacity(batch.capsules.len());
    for item in &batch.capsules {
        let payload = fs::read(&item.payload).map_err(|e| {
            Error::Config(format!("cannot read payload {}: {}", item.payload.display(), e))
        })?;
        let capsule_id = item
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if !seen.insert(capsule_id.clone()) {
            return Err(Error::Config(format!("duplicate capsule id in batch: {}", capsule_id)));
        }
        if recorded.contains(&capsule_id) {
            return Err(Error::DuplicateCapsuleId(capsule_id));
        }
        planned.push((item, capsule_id, payload));
    }

    let manifest = BatchManifest {
        session_id: session_id.clone(),
        items: planned
            .iter()
            .map(|(item, capsule_id, payload)| ManifestItem {
                capsule_id: capsule_id.clone(),
                title: item.title.clone(),
                payload_sha256: hash::sha256(payload),
            })
            .collect(),
    };
    let manifest_hash = manifest.digest()?;

    let mut requests = Vec::with_capacity(planned.len());
    for (item, capsule_id, payload) in planned {
        let mut request = MintRequest::new(&item.title, &item.purpose)
            .with_id(&capsule_id)
            .with_session(&session_id)
            .with_entry_kind(&item.entry_kind)
            .with_manifest_hash(&manifest_hash);
        request.provenance = item.provenance.clone();
        request.validate(&payload, key)?;
        requests.push((request, payload));
    }

    Ok(BatchPlan {
        manifest,
        manifest_hash,
        requests,
        wrap,
    })
}

impl BatchPlan {
    /// Mint every capsule in batch order, one ledger commit each
    ///
    /// `on_minted` runs right after each commit, before the next capsule is
    /// minted. An error from it stops the batch.
    pub fn mint<S, F>(self, ledger: &S, key: &SigningKeyPair, mut on_minted: F) -> Result<BatchOutcome>
    where
        S: LedgerStore,
        F: FnMut(&Capsule) -> Result<()>,
    {
        info!(
            "Minting batch {} ({} capsules), manifest {}",
            self.manifest.session_id,
            self.requests.len(),
            self.manifest_hash
        );

        let mut capsules = Vec::with_capacity(self.requests.len());
        for (request, payload) in &self.requests {
            let capsule = packager::mint(payload, request, ledger, key, self.wrap)?;
            on_minted(&capsule)?;
            capsules.push(capsule);
        }

        Ok(BatchOutcome {
            manifest: self.manifest,
            manifest_hash: self.manifest_hash,
            capsules,
        })
    }
}
