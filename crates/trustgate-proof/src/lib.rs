//! # Trustgate Proof
//!
//! Verifies data asserted by external providers: cryptographic evidence,
//! freshness, schema conformance, and agreement with other sources. Every
//! verification lands in an audit trail.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`audit`] | Audit entries and retention-based pruning |
//! | [`config`] | Verifier settings |
//! | [`consistency`] | Cross-source similarity and the comparison lookup trait |
//! | [`crypto`] | ed25519 signatures, Merkle paths, hash chain links |
//! | [`error`] | Error types |
//! | [`hashing`] | Canonical JSON and content hashes |
//! | [`result`] | Per-check outcomes and the combined result |
//! | [`schema`] | Per-source payload schemas |
//! | [`temporal`] | Timestamp extraction and age scoring |
//! | [`verifier`] | The [`ProofVerifier`] itself |
//!
//! ## Scoring
//!
//! ```text
//! cryptographic  0.4   (only when a proof is attached)
//! temporal       0.2
//! schema         0.2   (0.5 when the source has no schema)
//! consistency    0.2   (0.5 when there is nothing to compare)
//! ```
//!
//! Weights are renormalized over the checks that ran. A result is valid when
//! every check passed and the weighted confidence reaches 0.7.

pub mod audit;
pub mod config;
pub mod consistency;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod result;
pub mod schema;
pub mod temporal;
pub mod verifier;

pub use audit::{AuditEntry, AuditTrail};
pub use config::VerifierConfig;
pub use consistency::{similarity, ComparisonFuture, ComparisonSource, RecentPayloads};
pub use crypto::{
    chain_hash, find_nonce, merkle_proof, merkle_root, ChainProof, CryptographicProof,
    DifficultyPredicate, LeadingZeros, MerkleProof, SignatureProof,
};
pub use error::VerifyError;
pub use hashing::{canonical_json, HashAlgorithm};
pub use result::{CheckKind, CheckOutcome, DataVerificationResult};
pub use schema::{DataSchema, FieldType};
pub use verifier::{ProofVerifier, VerificationRequest, VerifierMetrics};
