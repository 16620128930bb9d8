//! TEK wrapping under the platform KEK
//!
//! Wrapped format: `[12-byte nonce][GCM ciphertext + 16-byte tag]`, sealed
//! with AAD = organization_id so a wrapped TEK cannot be replayed into
//! another organization's row.

use anyhow::{bail, Result};
use pivault_crypto::{aead, SecretKey, IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Wrap a TEK for storage.
pub fn wrap_tek(kek: &SecretKey, tek: &SecretKey, organization_id: &str) -> Result<Vec<u8>> {
    let aad = aead::tek_aad(organization_id);
    let (iv, ciphertext) =
        aead::seal(kek, tek.as_bytes(), &aad).map_err(|e| anyhow::anyhow!("wrapping TEK: {e}"))?;

    let mut wrapped = Vec::with_capacity(IV_SIZE + ciphertext.len());
    wrapped.extend_from_slice(&iv);
    wrapped.extend_from_slice(&ciphertext);
    Ok(wrapped)
}

/// Unwrap a stored TEK. Fails on a wrong KEK, a tampered blob, or a blob
/// sealed for a different organization.
pub fn unwrap_tek(kek: &SecretKey, wrapped: &[u8], organization_id: &str) -> Result<SecretKey> {
    if wrapped.len() < IV_SIZE + KEY_SIZE + TAG_SIZE {
        bail!(
            "wrapped TEK too short: {} bytes (expected at least {})",
            wrapped.len(),
            IV_SIZE + KEY_SIZE + TAG_SIZE
        );
    }

    let (iv, ciphertext) = wrapped.split_at(IV_SIZE);
    let aad = aead::tek_aad(organization_id);

    let plaintext = aead::open(kek, iv, ciphertext, &aad)
        .map_err(|_| anyhow::anyhow!("TEK unwrap failed: wrong KEK or corrupted record"))?;

    plaintext
        .into_key()
        .map_err(|_| anyhow::anyhow!("unwrapped TEK has wrong size"))
}
