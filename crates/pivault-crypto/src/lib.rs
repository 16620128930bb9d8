//! pivault-crypto: envelope-encryption primitives
//!
//! Key hierarchy:
//! ```text
//! KEK (256-bit, loaded at process start)
//!   └── TEK (per-organization, 256-bit random, wrapped by KEK, AAD=org_id)
//!         └── FDK: HKDF-SHA-256(salt=organization key, ikm=TEK, info=∅)
//!               └── Record AEAD: AES-256-GCM (nonce=random 96-bit,
//!                   AAD=org_id || 0x00 || data_type)
//! ```
//!
//! All plaintext key material and decrypted PII move through [`SecretKey`]
//! and [`SecretBuf`], which overwrite their contents on drop.

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod rng;
pub mod secret;

pub use aead::{open, record_aad, seal, tek_aad};
pub use hash::{constant_time_eq, sha256_hex};
pub use kdf::derive_field_key;
pub use rng::{generate_reference_hash, random_bytes};
pub use secret::{SecretBuf, SecretKey};

use thiserror::Error;

/// Size of a key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid IV length: {0} bytes (expected {IV_SIZE})")]
    InvalidIvLength(usize),

    /// Wrong key, tampered ciphertext, or mismatched associated data.
    #[error("authentication failed")]
    AuthFailed,

    #[error("encryption failed")]
    SealFailed,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("plaintext is not valid UTF-8")]
    NotUtf8,
}
