//! AES-256-GCM seal/open with tenant-binding associated data
//!
//! Sealed record format: the 12-byte nonce is returned separately and stored
//! in the record's `iv` column; ciphertext carries the 16-byte GCM tag.
//!
//! AAD policy:
//! - PII records: `organization_id || 0x00 || data_type`
//! - TEK wrapping: `organization_id`
//!
//! The AAD binds each ciphertext to its owning tenant (and, for records, its
//! declared data type), so a ciphertext swapped across organizations or
//! relabelled to another type fails authentication even under the right key.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::secret::{SecretBuf, SecretKey};
use crate::{CryptoError, IV_SIZE};

/// Encrypt `plaintext` under `key` with a fresh random 12-byte IV.
///
/// Returns `(iv, ciphertext || tag)`.
pub fn seal(
    key: &SecretKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; IV_SIZE], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::SealFailed)?;

    Ok((iv, ciphertext))
}

/// Decrypt `ciphertext` under `key`.
///
/// Fails with [`CryptoError::AuthFailed`] on a wrong key, tampered
/// ciphertext, or mismatched AAD; no partial plaintext is ever returned.
pub fn open(
    key: &SecretKey,
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<SecretBuf, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIvLength(iv.len()));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(iv);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthFailed)?;

    Ok(SecretBuf::from_vec(plaintext))
}

/// AAD for a PII record: `organization_id || 0x00 || data_type`.
///
/// The NUL separator keeps `("ab", "c")` and `("a", "bc")` distinct.
pub fn record_aad(organization_id: &str, data_type: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(organization_id.len() + 1 + data_type.len());
    aad.extend_from_slice(organization_id.as_bytes());
    aad.push(0u8);
    aad.extend_from_slice(data_type.as_bytes());
    aad
}

/// AAD for TEK wrapping: the owning organization id.
pub fn tek_aad(organization_id: &str) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SecretKey::generate();
        let aad = record_aad("acme", "email");

        let (iv, ciphertext) = seal(&key, b"user@example.com", &aad).unwrap();
        let plaintext = open(&key, &iv, &ciphertext, &aad).unwrap();

        assert_eq!(plaintext.as_bytes(), b"user@example.com");
    }

    #[test]
    fn test_seal_open_empty_plaintext() {
        let key = SecretKey::generate();
        let (iv, ciphertext) = seal(&key, b"", b"aad").unwrap();
        let plaintext = open(&key, &iv, &ciphertext, b"aad").unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_open_wrong_key_fails() {
        let key1 = SecretKey::generate();
        let key2 = SecretKey::generate();
        let (iv, ciphertext) = seal(&key1, b"secret", b"").unwrap();

        assert!(matches!(
            open(&key2, &iv, &ciphertext, b""),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn test_open_wrong_aad_fails() {
        let key = SecretKey::generate();
        let (iv, ciphertext) = seal(&key, b"secret", &record_aad("acme", "email")).unwrap();

        let wrong_org = open(&key, &iv, &ciphertext, &record_aad("globex", "email"));
        assert!(matches!(wrong_org, Err(CryptoError::AuthFailed)));

        let wrong_type = open(&key, &iv, &ciphertext, &record_aad("acme", "ssn"));
        assert!(matches!(wrong_type, Err(CryptoError::AuthFailed)));
    }

    #[test]
    fn test_open_tampered_ciphertext_fails() {
        let key = SecretKey::generate();
        let (iv, mut ciphertext) = seal(&key, b"secret data", b"").unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(matches!(
            open(&key, &iv, &ciphertext, b""),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn test_open_rejects_bad_iv_length() {
        let key = SecretKey::generate();
        let (_, ciphertext) = seal(&key, b"secret", b"").unwrap();

        let result = open(&key, &[0u8; 16], &ciphertext, b"");
        assert!(matches!(result, Err(CryptoError::InvalidIvLength(16))));
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let key = SecretKey::generate();
        let mut ivs = HashSet::new();
        for _ in 0..1000 {
            let (iv, _) = seal(&key, b"same plaintext", b"").unwrap();
            assert_eq!(iv.len(), IV_SIZE);
            assert!(ivs.insert(iv), "IV reuse detected");
        }
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let key = SecretKey::generate();
        let (_, c1) = seal(&key, b"same", b"").unwrap();
        let (_, c2) = seal(&key, b"same", b"").unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_record_aad_separator_is_unambiguous() {
        assert_ne!(record_aad("ab", "c"), record_aad("a", "bc"));
        assert_eq!(record_aad("acme", "email"), b"acme\0email".to_vec());
    }
}
