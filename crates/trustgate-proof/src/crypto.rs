//! Cryptographic proofs: ed25519 signatures, Merkle inclusion, and hash
//! chain links.
//!
//! All three operate on the payload's hex content hash. The proof envelope
//! may carry any subset of them; every one that is present must hold.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::result::{CheckKind, CheckOutcome};
use crate::{HashAlgorithm, VerifyError};

/// Hex-encoded ed25519 signature over the raw payload hash bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProof {
    pub signature: String,
    pub public_key: String,
}

impl SignatureProof {
    /// Signs `payload_hash` (hex) the way [`check`] expects it.
    pub fn sign(key: &SigningKey, payload_hash: &str) -> Result<Self, VerifyError> {
        let message = hex::decode(payload_hash)
            .map_err(|error| VerifyError::MalformedProof(format!("payload hash: {error}")))?;
        Ok(Self {
            signature: hex::encode(key.sign(&message).to_bytes()),
            public_key: hex::encode(key.verifying_key().as_bytes()),
        })
    }
}

/// Sibling hashes from the leaf up to `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub path: Vec<String>,
    pub root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProof {
    pub previous_hash: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CryptographicProof {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle: Option<MerkleProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainProof>,
}

impl CryptographicProof {
    pub fn with_signature(mut self, signature: SignatureProof) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_merkle(mut self, merkle: MerkleProof) -> Self {
        self.merkle = Some(merkle);
        self
    }

    pub fn with_chain(mut self, chain: ChainProof) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.signature.is_none() && self.merkle.is_none() && self.chain.is_none()
    }

    /// Stable digest of the envelope, used to key cached results.
    pub fn fingerprint(&self) -> String {
        let mut parts = Vec::new();
        if let Some(signature) = &self.signature {
            parts.push(format!("sig={}/{}", signature.signature, signature.public_key));
        }
        if let Some(merkle) = &self.merkle {
            parts.push(format!("merkle={}/{}", merkle.path.join(","), merkle.root));
        }
        if let Some(chain) = &self.chain {
            parts.push(format!("chain={}/{}", chain.previous_hash, chain.nonce));
        }
        HashAlgorithm::Sha256.digest_hex(parts.join("|").as_bytes())
    }
}

/// Decides whether a hash chain link is acceptable.
pub trait DifficultyPredicate: Send + Sync {
    fn is_satisfied(&self, link_hash: &str) -> bool;

    fn describe(&self) -> String;
}

/// Requires the hex link hash to start with this many `'0'` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadingZeros(pub usize);

impl Default for LeadingZeros {
    fn default() -> Self {
        Self(2)
    }
}

impl DifficultyPredicate for LeadingZeros {
    fn is_satisfied(&self, link_hash: &str) -> bool {
        link_hash.len() >= self.0 && link_hash.bytes().take(self.0).all(|byte| byte == b'0')
    }

    fn describe(&self) -> String {
        format!("{} leading zeros", self.0)
    }
}

/// Verifies every proof present in the envelope against `payload_hash`.
/// Confidence is all or nothing.
pub fn check(
    algorithm: HashAlgorithm,
    payload_hash: &str,
    proof: &CryptographicProof,
    difficulty: &dyn DifficultyPredicate,
) -> CheckOutcome {
    if proof.is_empty() {
        return CheckOutcome::fail(
            CheckKind::Cryptographic,
            0.0,
            vec![String::from("proof envelope is empty")],
        );
    }

    let mut errors = Vec::new();

    if let Some(signature) = &proof.signature {
        if let Err(error) = verify_signature(payload_hash, signature) {
            errors.push(error);
        }
    }

    if let Some(merkle) = &proof.merkle {
        let computed = fold_merkle_path(algorithm, payload_hash, &merkle.path);
        if !computed.eq_ignore_ascii_case(&merkle.root) {
            errors.push(format!(
                "merkle path folds to {computed}, expected root {}",
                merkle.root
            ));
        }
    }

    if let Some(chain) = &proof.chain {
        let link = chain_hash(algorithm, &chain.previous_hash, payload_hash, chain.nonce);
        if !difficulty.is_satisfied(&link) {
            errors.push(format!(
                "hash chain link {link} does not meet {}",
                difficulty.describe()
            ));
        }
    }

    if errors.is_empty() {
        CheckOutcome::pass(CheckKind::Cryptographic, 1.0)
    } else {
        CheckOutcome::fail(CheckKind::Cryptographic, 0.0, errors)
    }
}

fn verify_signature(payload_hash: &str, proof: &SignatureProof) -> Result<(), String> {
    let message = hex::decode(payload_hash).map_err(|error| format!("payload hash: {error}"))?;
    let key_bytes: [u8; 32] = hex::decode(&proof.public_key)
        .map_err(|error| format!("public key is not hex: {error}"))?
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("public key has {} bytes, expected 32", bytes.len()))?;
    let signature_bytes: [u8; 64] = hex::decode(&proof.signature)
        .map_err(|error| format!("signature is not hex: {error}"))?
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("signature has {} bytes, expected 64", bytes.len()))?;

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|error| format!("invalid public key: {error}"))?;
    key.verify_strict(&message, &Signature::from_bytes(&signature_bytes))
        .map_err(|_| String::from("signature does not match the payload hash"))
}

/// Hashes two nodes with the lexicographically smaller one first.
pub fn hash_pair(algorithm: HashAlgorithm, left: &str, right: &str) -> String {
    let left = left.to_ascii_lowercase();
    let right = right.to_ascii_lowercase();
    let (first, second) = if left <= right {
        (left, right)
    } else {
        (right, left)
    };
    algorithm.digest_hex(format!("{first}{second}").as_bytes())
}

pub fn fold_merkle_path(algorithm: HashAlgorithm, leaf: &str, path: &[String]) -> String {
    path.iter().fold(leaf.to_ascii_lowercase(), |node, sibling| {
        hash_pair(algorithm, &node, sibling)
    })
}

/// Root over `leaves` (hex hashes). An unpaired node is carried up unchanged.
pub fn merkle_root(algorithm: HashAlgorithm, leaves: &[String]) -> Option<String> {
    let mut level = normalized(leaves);
    while level.len() > 1 {
        level = next_level(algorithm, &level);
    }
    level.into_iter().next()
}

/// Inclusion proof for `leaves[index]`.
pub fn merkle_proof(algorithm: HashAlgorithm, leaves: &[String], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut level = normalized(leaves);
    let mut position = index;
    let mut path = Vec::new();
    while level.len() > 1 {
        if let Some(sibling) = level.get(position ^ 1) {
            path.push(sibling.clone());
        }
        level = next_level(algorithm, &level);
        position /= 2;
    }

    level
        .into_iter()
        .next()
        .map(|root| MerkleProof { path, root })
}

fn normalized(leaves: &[String]) -> Vec<String> {
    leaves.iter().map(|leaf| leaf.to_ascii_lowercase()).collect()
}

fn next_level(algorithm: HashAlgorithm, level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(algorithm, left, right),
            _ => pair[0].clone(),
        })
        .collect()
}

/// `hash(previous_hash || data_hash || nonce)` with the nonce in decimal.
pub fn chain_hash(algorithm: HashAlgorithm, previous_hash: &str, data_hash: &str, nonce: u64) -> String {
    algorithm.digest_hex(format!("{previous_hash}{data_hash}{nonce}").as_bytes())
}

/// Searches nonces `0..max_attempts` for a link that satisfies `difficulty`.
pub fn find_nonce(
    algorithm: HashAlgorithm,
    previous_hash: &str,
    data_hash: &str,
    difficulty: &dyn DifficultyPredicate,
    max_attempts: u64,
) -> Option<u64> {
    (0..max_attempts).find(|nonce| {
        difficulty.is_satisfied(&chain_hash(algorithm, previous_hash, data_hash, *nonce))
    })
}
