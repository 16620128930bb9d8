//! One-way verifier hash and constant-time comparison

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex-encoded SHA-256. Used as a stored verifier for presented secrets,
/// never as key material.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Constant-time equality for verifier hashes and tags.
///
/// Length mismatch returns false immediately; the lengths of the values
/// compared here (fixed-size hex digests) are not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
