// src/capsule/signing.rs
//! Capsule signing
//!
//! Provides Ed25519 signing over the signed region of a capsule.
//! Keys can be generated, stored, and loaded for signing operations.

use crate::error::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// The only supported signature algorithm
pub const ALGORITHM: &str = "ed25519";

/// Detached signature stored in the capsule's signature block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetachedSignature {
    /// Signature algorithm (currently only "ed25519")
    pub algorithm: String,
    /// Optional key identifier (fingerprint or name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Base64-encoded public key
    pub public_key: String,
    /// Base64-encoded signature bytes
    pub signature: String,
    /// Timestamp when signed (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl DetachedSignature {
    /// Encode for the signature block: base64 of the compact JSON form
    pub fn to_armor(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(BASE64.encode(json))
    }

    /// Decode a signature block
    ///
    /// Any encoding problem is a [`Error::SignatureInvalid`]; a corrupt
    /// signature block is never treated as "unsigned".
    pub fn from_armor(armor: &str) -> Result<Self> {
        let json = BASE64
            .decode(armor.as_bytes())
            .map_err(|e| Error::signature(format!("corrupt signature armor: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| Error::signature(format!("corrupt signature record: {}", e)))
    }
}

/// A signing key pair for capsules
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: Option<String>,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            signing_key,
            key_id: None,
        }
    }

    /// Set a human-readable key identifier
    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = Some(id.to_string());
        self
    }

    /// Get the public key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the public key as base64
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    /// Get the key ID
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Sign content and return a detached signature
    pub fn sign(&self, content: &[u8]) -> DetachedSignature {
        let signature = self.signing_key.sign(content);
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        DetachedSignature {
            algorithm: ALGORITHM.to_string(),
            key_id: self.key_id.clone(),
            public_key: self.public_key_base64(),
            signature: BASE64.encode(signature.to_bytes()),
            timestamp: Some(timestamp),
        }
    }

    /// Save the key pair to files (private and public)
    pub fn save_to_files(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        let private_data = KeyFile {
            algorithm: ALGORITHM.to_string(),
            key: BASE64.encode(self.signing_key.to_bytes()),
            key_id: self.key_id.clone(),
        };
        write_key_file(private_path, &private_data, true)?;

        let public_data = KeyFile {
            algorithm: ALGORITHM.to_string(),
            key: self.public_key_base64(),
            key_id: self.key_id.clone(),
        };
        write_key_file(public_path, &public_data, false)
    }

    /// Load a key pair from a private key file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let key_file = read_key_file(path)?;
        let key_array = decode_key_bytes(&key_file.key)
            .map_err(|e| Error::Key(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_array),
            key_id: key_file.key_id,
        })
    }
}

/// Key file format
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

/// Write a key file; a private key is never readable by anyone but the owner
#[cfg_attr(not(unix), allow(unused_variables))]
fn write_key_file(path: &Path, data: &KeyFile, private: bool) -> Result<()> {
    let text = toml::to_string_pretty(data)
        .map_err(|e| Error::Key(format!("Failed to encode key file: {}", e)))?;
    let write_err =
        |e: std::io::Error| Error::Key(format!("Failed to write key file {}: {}", path.display(), e));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    let mut file = options.open(path).map_err(write_err)?;

    // An existing file keeps its mode on open; tighten it before writing
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if private {
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
    }

    file.write_all(text.as_bytes()).map_err(write_err)
}

fn read_key_file(path: &Path) -> Result<KeyFile> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Key(format!("Failed to read key file {}: {}", path.display(), e)))?;
    let key_file: KeyFile = toml::from_str(&content)
        .map_err(|e| Error::Key(format!("Failed to parse key file {}: {}", path.display(), e)))?;

    if key_file.algorithm != ALGORITHM {
        return Err(Error::Key(format!(
            "Unsupported key algorithm: {}",
            key_file.algorithm
        )));
    }
    Ok(key_file)
}

fn decode_key_bytes(encoded: &str) -> std::result::Result<[u8; 32], String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| format!("invalid base64 in key: {}", e))?;
    bytes
        .try_into()
        .map_err(|_| "invalid key length".to_string())
}

/// Public key loaded from a key file, with its optional identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyFile {
    /// Base64-encoded Ed25519 public key
    pub key: String,
    pub key_id: Option<String>,
}

/// Load a public key from a file (for the trust keyring)
pub fn load_public_key(path: &Path) -> Result<PublicKeyFile> {
    let key_file = read_key_file(path)?;
    decode_key_bytes(&key_file.key).map_err(|e| Error::Key(format!("{}: {}", path.display(), e)))?;
    Ok(PublicKeyFile {
        key: key_file.key,
        key_id: key_file.key_id,
    })
}
