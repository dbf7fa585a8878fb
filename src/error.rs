// src/error.rs
//! Error types for capsule minting, verification, execution and the ledger

use thiserror::Error;

/// Result type for capsule operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the capsule protocol
///
/// Everything except [`Error::ExecutionFailure`] means the capsule or ledger
/// cannot be trusted. Those errors are terminal: nothing downstream of the
/// failing check may run.
#[derive(Error, Debug)]
pub enum Error {
    /// Structural problem: missing, duplicated or misplaced delimiters
    #[error("malformed capsule: {0}")]
    MalformedCapsule(String),

    /// A recomputed digest disagrees with the embedded one
    #[error("{field} mismatch: expected {expected}, computed {actual}")]
    HashMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// Cryptographic verification failed or the signer is not trusted
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Ledger append with a stale or incorrect prev_hash
    #[error("ledger chain mismatch: tip is {expected}, entry links to {actual}")]
    ChainMismatch { expected: String, actual: String },

    /// Ledger append for a capsule id that is already recorded
    #[error("capsule id {0} is already recorded in the ledger")]
    DuplicateCapsuleId(String),

    /// Embedded payload is not valid base64
    #[error("payload decode failed: {0}")]
    PayloadDecode(String),

    /// Payload ran but did not succeed
    #[error("payload of capsule {capsule_id} failed: {reason}")]
    ExecutionFailure {
        capsule_id: String,
        reason: String,
        exit_code: Option<i32>,
    },

    /// Metadata cannot be represented canonically
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Ledger file contains a line that is not a valid entry
    #[error("ledger corrupt at line {line}: {reason}")]
    LedgerCorrupt { line: usize, reason: String },

    /// Signing key could not be loaded or used
    #[error("key error: {0}")]
    Key(String),

    /// Configuration file problem
    #[error("config error: {0}")]
    Config(String),

    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a malformed-capsule error with a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedCapsule(msg.into())
    }

    /// Create a signature error with a message
    pub fn signature(msg: impl Into<String>) -> Self {
        Self::SignatureInvalid(msg.into())
    }

    /// Whether this error means the capsule must not be trusted
    pub fn is_untrusted(&self) -> bool {
        matches!(
            self,
            Self::MalformedCapsule(_)
                | Self::HashMismatch { .. }
                | Self::SignatureInvalid(_)
                | Self::PayloadDecode(_)
                | Self::Encoding(_)
        )
    }

    /// Whether this error is a ledger integrity failure
    pub fn is_chain_failure(&self) -> bool {
        matches!(
            self,
            Self::ChainMismatch { .. } | Self::DuplicateCapsuleId(_) | Self::LedgerCorrupt { .. }
        )
    }

    /// Process exit code for the CLI
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | 1 | IO, config, key or usage problem |
    /// | 2 | capsule untrusted (verification failure) |
    /// | 3 | payload execution failure |
    /// | 4 | ledger chain failure |
    pub fn exit_code(&self) -> i32 {
        if self.is_untrusted() {
            2
        } else if matches!(self, Self::ExecutionFailure { .. }) {
            3
        } else if self.is_chain_failure() {
            4
        } else {
            1
        }
    }
}
