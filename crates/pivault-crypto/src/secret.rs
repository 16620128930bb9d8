//! Zeroising containers for key material and decrypted PII

use rand::RngCore;
use zeroize::Zeroize;

use crate::{CryptoError, KEY_SIZE};

/// A 256-bit secret key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A variable-length secret buffer (decrypted PII, unwrapped key material
/// in transit). Zeroized on drop.
pub struct SecretBuf {
    bytes: Vec<u8>,
}

impl SecretBuf {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the buffer into a `String` without copying.
    ///
    /// On invalid UTF-8 the bytes are zeroised before the error returns.
    /// The caller owns zeroisation of the returned `String` (wrap it in a
    /// zeroising container before it crosses an API boundary).
    pub fn into_utf8(mut self) -> Result<String, CryptoError> {
        let bytes = std::mem::take(&mut self.bytes);
        String::from_utf8(bytes).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            CryptoError::NotUtf8
        })
    }

    /// Copy the buffer into a fixed-size key, failing on length mismatch.
    pub fn into_key(self) -> Result<SecretKey, CryptoError> {
        if self.bytes.len() != KEY_SIZE {
            return Err(CryptoError::KeyDerivation);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&self.bytes);
        Ok(SecretKey::from_bytes(key))
    }
}

impl Drop for SecretBuf {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBuf")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
