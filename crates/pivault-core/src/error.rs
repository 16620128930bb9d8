use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Engine error kinds.
///
/// `NotFound` and `DecryptionFailed` are distinct internally (and in logs)
/// but collapse to one message at the adapter boundary via
/// [`VaultError::external_message`], so callers cannot distinguish a missing
/// reference from a wrong organization key.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("token not found")]
    NotFound,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("organization key verification failed")]
    OrkVerification,

    #[error("key encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("persistence unavailable: {0}")]
    PersistUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VaultError {
    /// Stable machine-readable code for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Validation(_) => "VALIDATION_ERROR",
            VaultError::NotFound => "NOT_FOUND",
            VaultError::DecryptionFailed => "DECRYPTION_FAILED",
            VaultError::OrkVerification => "ORK_VERIFICATION_FAILED",
            VaultError::KeyUnavailable(_) => "KEY_UNAVAILABLE",
            VaultError::PersistUnavailable(_) => "PERSIST_UNAVAILABLE",
            VaultError::Internal(_) => "INTERNAL",
        }
    }

    /// Message safe to return to callers.
    ///
    /// Missing-token and failed-decryption cases share one message so the
    /// response is not an oracle over reference existence vs key correctness.
    pub fn external_message(&self) -> String {
        match self {
            VaultError::Validation(msg) => msg.clone(),
            VaultError::NotFound | VaultError::DecryptionFailed => {
                "token not found or decryption failed".to_string()
            }
            VaultError::OrkVerification => "token not found or decryption failed".to_string(),
            VaultError::KeyUnavailable(_) => "key service unavailable".to_string(),
            VaultError::PersistUnavailable(_) => "persistence unavailable".to_string(),
            VaultError::Internal(_) => "internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_and_decryption_share_external_message() {
        assert_eq!(
            VaultError::NotFound.external_message(),
            VaultError::DecryptionFailed.external_message()
        );
        assert_eq!(
            VaultError::OrkVerification.external_message(),
            VaultError::NotFound.external_message()
        );
    }

    #[test]
    fn test_codes_stay_distinct_internally() {
        assert_ne!(
            VaultError::NotFound.code(),
            VaultError::DecryptionFailed.code()
        );
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = VaultError::Validation("data field is required".into());
        assert_eq!(err.external_message(), "data field is required");
    }
}
