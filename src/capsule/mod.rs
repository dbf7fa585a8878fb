// src/capsule/mod.rs
//! Capsule container
//!
//! A capsule is one text file bundling canonical metadata, a base64 payload
//! and a detached Ed25519 signature. See [`format`] for the byte layout and
//! the exact signed region.
//!
//! Lifecycle per capsule and invocation:
//!
//! ```text
//! LocatedCapsule --verify--> VerifiedCapsule --stage--> StagedPayload --execute--> ExecutionResult
//!        |
//!        +--> Error (rejected; nothing is decoded or executed)
//! ```

pub mod encoder;
pub mod format;
pub mod manifest;
pub mod metadata;
pub mod packager;
pub mod provenance;
pub mod runner;
pub mod signing;
pub mod verify;

pub use manifest::{BatchFile, BatchManifest, BatchOutcome, BatchPlan, plan_batch};
pub use metadata::{CapsuleMetadata, PayloadDescriptor};
pub use packager::{Capsule, MintRequest, assemble, mint};
pub use runner::{ExecutionResult, RunOptions, StagedPayload, run};
pub use signing::{DetachedSignature, SigningKeyPair};
pub use verify::{
    Keyring, LocatedCapsule, UntrustedMetadata, VerificationResult, VerifiedCapsule, meta, verify,
};
