//! SHA-256 helpers shared by ASKE session-id computation and Ed25519
//! key fingerprinting.

use sha2::{Digest, Sha256};

/// `SHA256(data)`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// ASKE session id: `SHA256` over each participant's (id, nonce) pair,
/// sorted by id so every member computes the same hash regardless of
/// upflow/downflow traversal order.
///
/// `pairs` need not already be sorted; this function sorts a local copy.
pub fn session_id(pairs: &[(Vec<u8>, [u8; 32])]) -> [u8; 32] {
    let mut sorted: Vec<&(Vec<u8>, [u8; 32])> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (id, nonce) in sorted {
        hasher.update((id.len() as u32).to_be_bytes());
        hasher.update(id);
        hasher.update(nonce);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}
