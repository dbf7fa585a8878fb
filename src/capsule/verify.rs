// src/capsule/verify.rs
//! Capsule verification
//!
//! Verification is fail-closed and runs in a fixed order:
//!
//! 1. Structure: the five markers are located ([`format::parse`])
//! 2. Signature: the detached signature is checked over the raw signed
//!    region against the trusted [`Keyring`]
//! 3. Metadata: the metadata line must be canonical and its `self_hash`
//!    must match a fresh recomputation
//! 4. Payload: the base64 block is decoded in memory and checked against
//!    `payload_descriptor`
//!
//! The first failing step rejects the capsule. Only a [`VerifiedCapsule`]
//! carries decoded payload bytes, so nothing can be staged or executed from
//! a capsule that did not pass every step.

use crate::capsule::encoder;
use crate::capsule::format;
use crate::capsule::metadata::{CapsuleMetadata, PAYLOAD_ENCODING};
use crate::capsule::signing::{self, ALGORITHM, DetachedSignature};
use crate::error::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A public key the verifier accepts signatures from
#[derive(Debug, Clone)]
pub struct TrustedKey {
    key: VerifyingKey,
    key_id: Option<String>,
}

impl TrustedKey {
    /// Base64 form of the key
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key.as_bytes())
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
}

/// Set of trusted signer keys
///
/// An empty keyring trusts nobody: every verification against it fails.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<TrustedKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a keyring from base64 keys and public key files
    pub fn from_sources(keys: &[String], files: &[PathBuf]) -> Result<Self> {
        let mut keyring = Self::new();
        for key in keys {
            keyring.add_base64(key, None)?;
        }
        for file in files {
            keyring.add_file(file)?;
        }
        Ok(keyring)
    }

    /// Trust a base64-encoded Ed25519 public key
    pub fn add_base64(&mut self, key: &str, key_id: Option<&str>) -> Result<()> {
        let key = decode_public_key(key).map_err(Error::Key)?;
        if !self.keys.iter().any(|k| k.key == key) {
            self.keys.push(TrustedKey {
                key,
                key_id: key_id.map(str::to_string),
            });
        }
        Ok(())
    }

    /// Trust the public key stored in a key file
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let public = signing::load_public_key(path)?;
        self.add_base64(&public.key, public.key_id.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[TrustedKey] {
        &self.keys
    }

    fn find(&self, key: &VerifyingKey) -> Option<&TrustedKey> {
        self.keys.iter().find(|k| &k.key == key)
    }
}

fn decode_public_key(encoded: &str) -> std::result::Result<VerifyingKey, String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| format!("Invalid public key base64: {}", e))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "Public key must be 32 bytes".to_string())?;
    VerifyingKey::from_bytes(&array).map_err(|e| format!("Invalid public key: {}", e))
}

/// Who signed a capsule, as recorded in its signature block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignerInfo {
    pub key_id: Option<String>,
    pub public_key: String,
    pub timestamp: Option<String>,
}

/// Check a detached signature over `region`
///
/// The signer must be in `keyring`; the embedded key is only used to find
/// the trusted entry and is never trusted on its own.
pub fn verify_signature(
    region: &[u8],
    sig: &DetachedSignature,
    keyring: &Keyring,
) -> Result<SignerInfo> {
    if keyring.is_empty() {
        return Err(Error::signature("no trusted keys configured"));
    }
    if sig.algorithm != ALGORITHM {
        return Err(Error::signature(format!(
            "Unsupported algorithm: {}",
            sig.algorithm
        )));
    }

    let embedded = decode_public_key(&sig.public_key).map_err(Error::signature)?;
    let trusted = keyring.find(&embedded).ok_or_else(|| {
        Error::signature(format!(
            "Key not trusted: {}",
            sig.key_id.as_deref().unwrap_or(&sig.public_key)
        ))
    })?;

    let sig_bytes = BASE64
        .decode(&sig.signature)
        .map_err(|e| Error::signature(format!("Invalid signature base64: {}", e)))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::signature(format!("Invalid signature: {}", e)))?;

    trusted
        .key
        .verify_strict(region, &signature)
        .map_err(|e| Error::signature(format!("Signature verification failed: {}", e)))?;

    Ok(SignerInfo {
        key_id: sig.key_id.clone().or_else(|| trusted.key_id.clone()),
        public_key: trusted.to_base64(),
        timestamp: sig.timestamp.clone(),
    })
}

/// A capsule whose blocks have been located but not yet checked
#[derive(Debug, Clone)]
pub struct LocatedCapsule {
    bytes: Vec<u8>,
    source: Option<PathBuf>,
}

impl LocatedCapsule {
    /// Read and locate a capsule file
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut located = Self::from_bytes(bytes)?;
        located.source = Some(path.to_path_buf());
        Ok(located)
    }

    /// Locate the blocks of an in-memory capsule
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        format::parse(&bytes)?;
        Ok(Self {
            bytes,
            source: None,
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read the metadata without checking anything
    pub fn metadata_untrusted(&self) -> Result<UntrustedMetadata> {
        let sections = format::parse(&self.bytes)?;
        let metadata = serde_json::from_slice(sections.metadata)
            .map_err(|e| Error::malformed(format!("metadata block is not valid metadata JSON: {}", e)))?;
        Ok(UntrustedMetadata { metadata })
    }

    /// Run every check, consuming the located capsule
    pub fn verify(self, keyring: &Keyring) -> Result<VerifiedCapsule> {
        let label = self.label();
        match self.check(keyring) {
            Ok(verified) => {
                info!(
                    "Verified capsule {} ({})",
                    verified.metadata.capsule_id, label
                );
                Ok(verified)
            }
            Err(e) => {
                warn!("Rejected capsule {}: {}", label, e);
                Err(e)
            }
        }
    }

    fn check(self, keyring: &Keyring) -> Result<VerifiedCapsule> {
        let sections = format::parse(&self.bytes)?;

        let sig = DetachedSignature::from_armor(&sections.armor()?)?;
        let signer = verify_signature(sections.signed_region, &sig, keyring)?;
        debug!("Signature valid, signer {:?}", signer.key_id);

        let metadata = encoder::decode_sealed(sections.metadata)?;
        metadata.verify_self_hash()?;

        if metadata.payload_descriptor.encoding != PAYLOAD_ENCODING {
            return Err(Error::malformed(format!(
                "unsupported payload encoding: {}",
                metadata.payload_descriptor.encoding
            )));
        }
        let payload = BASE64
            .decode(sections.payload_b64()?)
            .map_err(|e| Error::PayloadDecode(e.to_string()))?;
        metadata.payload_descriptor.check(&payload)?;

        Ok(VerifiedCapsule {
            metadata,
            payload,
            signer,
            source: self.source,
        })
    }

    fn label(&self) -> String {
        match &self.source {
            Some(path) => path.display().to_string(),
            None => "<memory>".to_string(),
        }
    }
}

/// A capsule that passed every check
///
/// Holds the decoded payload; only this type can stage a payload for
/// execution.
#[derive(Debug, Clone)]
pub struct VerifiedCapsule {
    metadata: CapsuleMetadata,
    payload: Vec<u8>,
    signer: SignerInfo,
    source: Option<PathBuf>,
}

impl VerifiedCapsule {
    pub fn metadata(&self) -> &CapsuleMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signer(&self) -> &SignerInfo {
        &self.signer
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Summary of the verification
    pub fn result(&self) -> VerificationResult {
        VerificationResult {
            capsule_id: self.metadata.capsule_id.clone(),
            title: self.metadata.title.clone(),
            session_id: self.metadata.session_id.clone(),
            chain_prev: self.metadata.chain_prev.clone(),
            self_hash: self.metadata.self_hash.clone(),
            payload_sha256: self.metadata.payload_descriptor.sha256.clone(),
            payload_size: self.metadata.payload_descriptor.size,
            signer: self.signer.clone(),
        }
    }
}

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub capsule_id: String,
    pub title: String,
    pub session_id: String,
    pub chain_prev: String,
    pub self_hash: String,
    pub payload_sha256: String,
    pub payload_size: u64,
    pub signer: SignerInfo,
}

/// Verify a capsule file
pub fn verify(path: &Path, keyring: &Keyring) -> Result<VerificationResult> {
    Ok(LocatedCapsule::open(path)?.verify(keyring)?.result())
}

/// Metadata read without verifying the signature or any hash
///
/// Informational only. Nothing in it may be used to decide whether to trust
/// or run a capsule.
#[derive(Debug, Clone)]
pub struct UntrustedMetadata {
    metadata: CapsuleMetadata,
}

impl UntrustedMetadata {
    pub fn untrusted(&self) -> &CapsuleMetadata {
        &self.metadata
    }

    /// Pretty JSON for display
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.metadata)?)
    }
}

impl fmt::Display for UntrustedMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (unverified)", self.metadata.capsule_id)
    }
}

/// Extract metadata from a well-formed capsule file without verifying it
pub fn meta(path: &Path) -> Result<UntrustedMetadata> {
    LocatedCapsule::open(path)?.metadata_untrusted()
}

/// Print verification result in human-readable format
pub fn print_result(result: &VerificationResult) {
    println!("[OK] {} ({})", result.capsule_id, result.title);
    println!();
    println!("Signature: [VALID]");
    if let Some(id) = &result.signer.key_id {
        println!("  Key ID: {}", id);
    }
    println!("  Public key: {}", result.signer.public_key);
    if let Some(ts) = &result.signer.timestamp {
        println!("  Signed: {}", ts);
    }
    println!();
    println!("Content: [VALID]");
    println!("  self_hash: {}", result.self_hash);
    println!(
        "  payload:   {} ({} bytes)",
        result.payload_sha256, result.payload_size
    );
    println!("  session:   {}", result.session_id);
    println!("  chain_prev: {}", result.chain_prev);
}

/// Print a rejection in human-readable format
pub fn print_rejection(path: &Path, err: &Error) {
    println!("[FAILED] {}", path.display());
    println!();
    println!("  {}", err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::signing::SigningKeyPair;

    fn keyring_for(key: &SigningKeyPair) -> Keyring {
        let mut keyring = Keyring::new();
        keyring.add_base64(&key.public_key_base64(), key.key_id()).unwrap();
        keyring
    }

    #[test]
    fn test_keyring_deduplicates() {
        let key = SigningKeyPair::generate();
        let mut keyring = keyring_for(&key);
        keyring.add_base64(&key.public_key_base64(), None).unwrap();
        assert_eq!(keyring.len(), 1);
    }

    #[test]
    fn test_keyring_rejects_bad_key() {
        let mut keyring = Keyring::new();
        assert!(matches!(keyring.add_base64("AAAA", None), Err(Error::Key(_))));
        assert!(keyring.is_empty());
    }

    #[test]
    fn test_verify_signature_trusted() {
        let key = SigningKeyPair::generate().with_key_id("release");
        let sig = key.sign(b"region");
        let signer = verify_signature(b"region", &sig, &keyring_for(&key)).unwrap();
        assert_eq!(signer.key_id.as_deref(), Some("release"));
        assert_eq!(signer.public_key, key.public_key_base64());
    }

    #[test]
    fn test_verify_signature_wrong_bytes() {
        let key = SigningKeyPair::generate();
        let sig = key.sign(b"region");
        assert!(matches!(
            verify_signature(b"regioN", &sig, &keyring_for(&key)),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_verify_signature_untrusted_key() {
        let key = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let sig = key.sign(b"region");
        let err = verify_signature(b"region", &sig, &keyring_for(&other)).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(ref m) if m.contains("not trusted")));
    }

    #[test]
    fn test_verify_signature_empty_keyring() {
        let key = SigningKeyPair::generate();
        let sig = key.sign(b"region");
        assert!(matches!(
            verify_signature(b"region", &sig, &Keyring::new()),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_swapped_public_key_is_rejected() {
        // Signature made by one key, relabelled with a trusted key
        let trusted = SigningKeyPair::generate();
        let attacker = SigningKeyPair::generate();
        let mut sig = attacker.sign(b"region");
        sig.public_key = trusted.public_key_base64();
        assert!(matches!(
            verify_signature(b"region", &sig, &keyring_for(&trusted)),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let key = SigningKeyPair::generate();
        let mut sig = key.sign(b"region");
        sig.algorithm = "rsa".into();
        assert!(verify_signature(b"region", &sig, &keyring_for(&key)).is_err());
    }

    #[test]
    fn test_located_rejects_malformed() {
        assert!(matches!(
            LocatedCapsule::from_bytes(b"not a capsule\n".to_vec()),
            Err(Error::MalformedCapsule(_))
        ));
    }
}
