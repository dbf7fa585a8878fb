// src/hash.rs

//! Content hashing for capsules and the ledger chain
//!
//! Every digest in the protocol is SHA-256, rendered as 64 lowercase hex
//! characters:
//!
//! | Digest | Input |
//! |--------|-------|
//! | `self_hash` | canonical metadata without `self_hash` |
//! | `payload_descriptor.sha256` | decoded payload bytes |
//! | `entry_hash` | ledger entry body (see [`crate::ledger::entry_hash`]) |
//! | `manifest_hash` | canonical batch manifest |

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Incremental SHA-256 hasher
#[derive(Default)]
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Finalize and return the hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.state.finalize())
    }
}

/// Compute the SHA-256 digest of a byte slice
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Check that a string is a well-formed lowercase hex digest
pub fn is_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Verify bytes match an expected digest
///
/// `field` names the digest in the resulting [`Error::HashMismatch`].
///
/// # Example
/// ```
/// use capsule::hash::verify_sha256;
///
/// let data = b"hello world";
/// let hash = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
/// assert!(verify_sha256(data, hash, "payload").is_ok());
/// ```
pub fn verify_sha256(data: &[u8], expected: &str, field: &'static str) -> Result<()> {
    let actual = sha256(data);
    if actual == expected {
        Ok(())
    } else {
        Err(Error::HashMismatch {
            field,
            expected: expected.to_string(),
            actual,
        })
    }
}
