//! Key Encryption Key providers
//!
//! The KEK never leaves the engine's address space; callers receive a
//! zeroising copy per use and let it drop.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pivault_core::VaultError;
use pivault_crypto::{SecretKey, KEY_SIZE};

pub trait KekProvider: Send + Sync {
    /// A copy of the KEK for one wrap/unwrap operation.
    fn kek(&self) -> Result<SecretKey, VaultError>;
}

/// KEK loaded once from a base64-encoded config value.
#[derive(Debug)]
pub struct StaticKekProvider {
    kek: SecretKey,
}

impl StaticKekProvider {
    /// Decode and validate the configured KEK. Startup fails here if the
    /// decoded value is not exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        if encoded.is_empty() {
            return Err(VaultError::KeyUnavailable(
                "KEK is not configured".to_string(),
            ));
        }

        let decoded = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::KeyUnavailable(format!("KEK is not valid base64: {e}")))?;

        if decoded.len() != KEY_SIZE {
            return Err(VaultError::KeyUnavailable(format!(
                "KEK must be {KEY_SIZE} bytes, got {}",
                decoded.len()
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        // Clear the intermediate allocation as well
        let key = SecretKey::from_bytes(bytes);
        drop(pivault_crypto::SecretBuf::from_vec(decoded));

        Ok(Self { kek: key })
    }

    pub fn new(kek: SecretKey) -> Self {
        Self { kek }
    }
}

impl KekProvider for StaticKekProvider {
    fn kek(&self) -> Result<SecretKey, VaultError> {
        Ok(self.kek.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_kek_loads() {
        let encoded = BASE64.encode([7u8; KEY_SIZE]);
        let provider = StaticKekProvider::from_base64(&encoded).unwrap();
        assert_eq!(provider.kek().unwrap().as_bytes(), &[7u8; KEY_SIZE]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let encoded = BASE64.encode([7u8; 16]);
        let err = StaticKekProvider::from_base64(&encoded).unwrap_err();
        assert!(matches!(err, VaultError::KeyUnavailable(_)));
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let err = StaticKekProvider::from_base64("!!! not base64 !!!").unwrap_err();
        assert!(matches!(err, VaultError::KeyUnavailable(_)));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            StaticKekProvider::from_base64(""),
            Err(VaultError::KeyUnavailable(_))
        ));
    }
}
