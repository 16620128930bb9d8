//! Field Data Key derivation: HKDF-SHA-256(salt=organization key, ikm=TEK)

use hkdf::Hkdf;
use sha2::Sha256;

use crate::secret::SecretKey;
use crate::{CryptoError, KEY_SIZE};

/// Derive the per-operation Field Data Key.
///
/// RFC 5869 extract-and-expand with the caller's organization key as salt,
/// the unwrapped TEK as input key material, and an empty info string. The
/// result is never stored; callers let it drop (and zeroise) after use.
pub fn derive_field_key(tek: &SecretKey, organization_key: &[u8]) -> Result<SecretKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(organization_key), tek.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(&[], &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SecretKey::from_bytes(okm))
}
