//! CSPRNG helpers
//!
//! Everything draws from `OsRng`; reference identifiers and IVs must never
//! come from a seedable or thread-local generator.

use rand::RngCore;

/// `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A fresh reference hash: 16 random bytes, lowercase hex.
pub fn generate_reference_hash() -> String {
    hex::encode(random_bytes(16))
}
