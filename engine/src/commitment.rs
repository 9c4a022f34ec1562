//! Provably-fair commitment for match randomness.
//!
//! Before a lobby is promoted, the server draws a secret `(seed, nonce)` pair
//! and publishes `commit = SHA-256(hex(seed) || hex(nonce))`, hashed over
//! the published hex forms. Clients see only the
//! commitment while the match runs; the pre-image is revealed after
//! settlement so anyone can verify the published hash and replay every draw
//! the match made from the seed.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use petri_types::{NONCE_LEN, SEED_LEN};

/// A drawn `(seed, nonce)` pair and its published commitment.
#[derive(Clone, PartialEq, Eq)]
pub struct MatchCommitment {
    pub seed: [u8; SEED_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub commit: [u8; 32],
}

impl std::fmt::Debug for MatchCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The pre-image stays out of logs until reveal.
        f.debug_struct("MatchCommitment")
            .field("commit", &hex::encode(self.commit))
            .finish_non_exhaustive()
    }
}

impl MatchCommitment {
    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }

    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce)
    }

    pub fn commit_hex(&self) -> String {
        hex::encode(self.commit)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("invalid seed hex (expected {} bytes)", SEED_LEN)]
    InvalidSeed,
    #[error("invalid nonce hex (expected {} bytes)", NONCE_LEN)]
    InvalidNonce,
    #[error("invalid commit hex (expected 32 bytes)")]
    InvalidCommit,
}

/// Draw fresh commitment material from OS entropy.
pub fn generate_commitment() -> MatchCommitment {
    let mut seed = [0u8; SEED_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut seed);
    OsRng.fill_bytes(&mut nonce);
    let commit = compute_commit(&seed, &nonce);
    MatchCommitment {
        seed,
        nonce,
        commit,
    }
}

/// `SHA-256(seed || nonce)` over the lowercase hex renderings (the published
/// forms), so external verifiers can hash the strings they were shown: 64
/// seed characters followed by 32 nonce characters.
pub fn compute_commit(seed: &[u8; SEED_LEN], nonce: &[u8; NONCE_LEN]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(hex::encode(seed).as_bytes());
    hasher.update(hex::encode(nonce).as_bytes());
    hasher.finalize().into()
}

/// Recompute and compare in constant time.
pub fn verify_commitment(
    seed: &[u8; SEED_LEN],
    nonce: &[u8; NONCE_LEN],
    commit: &[u8; 32],
) -> bool {
    let expected = compute_commit(seed, nonce);
    expected.ct_eq(commit).into()
}

/// Hex-encoded variant used by the verify surface and tests.
pub fn verify_commitment_hex(
    seed_hex: &str,
    nonce_hex: &str,
    commit_hex: &str,
) -> Result<bool, CommitmentError> {
    let seed = decode_seed(seed_hex)?;
    let nonce = decode_nonce(nonce_hex)?;
    let commit: [u8; 32] = hex::decode(commit_hex)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(CommitmentError::InvalidCommit)?;
    Ok(verify_commitment(&seed, &nonce, &commit))
}

pub fn decode_seed(seed_hex: &str) -> Result<[u8; SEED_LEN], CommitmentError> {
    hex::decode(seed_hex)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(CommitmentError::InvalidSeed)
}

pub fn decode_nonce(nonce_hex: &str) -> Result<[u8; NONCE_LEN], CommitmentError> {
    hex::decode(nonce_hex)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(CommitmentError::InvalidNonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_commitment_verifies() {
        let pair = generate_commitment();
        assert!(verify_commitment(&pair.seed, &pair.nonce, &pair.commit));
    }

    #[test]
    fn any_bit_flip_fails_verification() {
        let pair = generate_commitment();

        let mut seed = pair.seed;
        seed[0] ^= 0x01;
        assert!(!verify_commitment(&seed, &pair.nonce, &pair.commit));

        let mut nonce = pair.nonce;
        nonce[NONCE_LEN - 1] ^= 0x80;
        assert!(!verify_commitment(&pair.seed, &nonce, &pair.commit));

        let mut commit = pair.commit;
        commit[16] ^= 0xff;
        assert!(!verify_commitment(&pair.seed, &pair.nonce, &commit));
    }

    #[test]
    fn zero_material_commitment_is_stable() {
        // seed = "00"*32, nonce = "00"*16: commit is SHA-256 over the 96
        // zero characters of the concatenated hex forms.
        let seed = [0u8; SEED_LEN];
        let nonce = [0u8; NONCE_LEN];
        let commit = compute_commit(&seed, &nonce);
        let expected: [u8; 32] = Sha256::digest("0".repeat(96).as_bytes()).into();
        assert_eq!(commit, expected);
        assert!(verify_commitment(&seed, &nonce, &commit));
    }

    #[test]
    fn hex_round_trip_verifies() {
        let pair = generate_commitment();
        let ok = verify_commitment_hex(&pair.seed_hex(), &pair.nonce_hex(), &pair.commit_hex())
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn hex_length_errors() {
        assert_eq!(
            verify_commitment_hex("00", &"00".repeat(16), &"00".repeat(32)),
            Err(CommitmentError::InvalidSeed)
        );
        assert_eq!(
            verify_commitment_hex(&"00".repeat(32), "beef", &"00".repeat(32)),
            Err(CommitmentError::InvalidNonce)
        );
        assert_eq!(
            verify_commitment_hex(&"00".repeat(32), &"00".repeat(16), "beef"),
            Err(CommitmentError::InvalidCommit)
        );
    }

    #[test]
    fn commitments_are_unique() {
        let a = generate_commitment();
        let b = generate_commitment();
        assert_ne!(a.seed, b.seed);
        assert_ne!(a.commit, b.commit);
    }

    #[test]
    fn debug_never_prints_seed() {
        let pair = generate_commitment();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.seed_hex()));
        assert!(rendered.contains(&pair.commit_hex()));
    }
}
