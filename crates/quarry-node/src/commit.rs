//! Commit-reveal hashing and move-commit authenticity.
//!
//! The prey announces `hash(x, y, identifier)` signed with its ed25519 key
//! before it reveals the move itself. Peers keep the hash and only accept
//! the reveal if it hashes to the same value, so the prey cannot change its
//! move after seeing where the players went.
//!
//! On the wire the signature travels as two hex components, `r` (the first
//! 32 bytes) and `s` (the last 32 bytes), and the public key as hex.

use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use quarry_proto::{Coord, MoveCommit};
use tracing::{debug, warn};

/// Digest binding a coordinate to the player that will reveal it.
///
/// A pure function of `(x, y, identifier)`.
pub fn calculate_hash(coord: Coord, identifier: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(coord.x.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(coord.y.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(format!("{identifier:?}").as_bytes());
    *hasher.finalize().as_bytes()
}

/// Sign `hash`, returning the `(r, s)` components in wire form.
pub fn sign_move_commit(key: &SigningKey, hash: &[u8]) -> (String, String) {
    let bytes = key.sign(hash).to_bytes();
    (hex::encode(&bytes[..32]), hex::encode(&bytes[32..]))
}

/// Wire form of a public key.
pub fn public_key_to_string(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}

/// Parse a public key from its wire form.
pub fn public_key_from_string(s: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(s).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn component_from_string(s: &str) -> Option<[u8; 32]> {
    hex::decode(s).ok()?.try_into().ok()
}

/// Build a signed commitment to `coord` for `identifier`.
pub fn create_move_commit(key: &SigningKey, identifier: &str, coord: Coord) -> MoveCommit {
    let hash = calculate_hash(coord, identifier);
    let (r, s) = sign_move_commit(key, &hash);
    MoveCommit {
        identifier: identifier.to_string(),
        move_hash: hash.to_vec(),
        r,
        s,
        pub_key: public_key_to_string(&key.verifying_key()),
    }
}

/// Check that the commit's signature verifies under its claimed public key.
///
/// Malformed keys or signature components count as a failed verification.
pub fn check_authenticity_of_move_commit(commit: &MoveCommit) -> bool {
    let Some(public_key) = public_key_from_string(&commit.pub_key) else {
        warn!(identifier = %commit.identifier, "move commit carries an unparseable public key");
        return false;
    };
    let (Some(r), Some(s)) = (component_from_string(&commit.r), component_from_string(&commit.s)) else {
        warn!(identifier = %commit.identifier, "trouble converting signature components");
        return false;
    };

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&r);
    bytes[32..].copy_from_slice(&s);
    let signature = Signature::from_bytes(&bytes);

    match public_key.verify(&commit.move_hash, &signature) {
        Ok(()) => true,
        Err(e) => {
            debug!(identifier = %commit.identifier, error = %e, "move commit signature rejected");
            false
        }
    }
}

/// Pending commitments, at most one per identifier.
#[derive(Debug, Default)]
pub struct CommitStore {
    commits: HashMap<String, String>,
}

impl CommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `hash` for `identifier` unless a commitment is already pending.
    ///
    /// Returns whether the commitment was stored.
    pub fn insert_if_absent(&mut self, identifier: &str, hash: &[u8]) -> bool {
        if self.commits.contains_key(identifier) {
            return false;
        }
        self.commits.insert(identifier.to_string(), hex::encode(hash));
        true
    }

    /// True if the pending commitment for `identifier` matches `coord`.
    pub fn check_move_commit_against_move(&self, identifier: &str, coord: Coord) -> bool {
        let hash = hex::encode(calculate_hash(coord, identifier));
        self.commits
            .iter()
            .any(|(id, committed)| id == identifier && *committed == hash)
    }

    pub fn remove(&mut self, identifier: &str) -> Option<String> {
        self.commits.remove(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.commits.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}
