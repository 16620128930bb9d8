//! Request validation
//!
//! Identity fields are attested by the adapter; validation here covers
//! presence and the closed data-type set, not authentication.

use pivault_core::{
    is_valid_reference_hash, strip_reference, DataType, DetokenizeRequest, TokenizeRequest,
    VaultError,
};
use secrecy::ExposeSecret;

pub fn validate_tokenize(req: &TokenizeRequest) -> Result<DataType, VaultError> {
    if req.data.expose_secret().is_empty() {
        return Err(VaultError::Validation("data field is required".into()));
    }
    if req.data_type.is_empty() {
        return Err(VaultError::Validation("dataType field is required".into()));
    }
    if req.client_id.is_empty() {
        return Err(VaultError::Validation("clientId field is required".into()));
    }
    if req.organization_id.is_empty() {
        return Err(VaultError::Validation(
            "organizationId field is required for envelope encryption".into(),
        ));
    }
    if req.organization_key.expose_secret().is_empty() {
        return Err(VaultError::Validation(
            "organizationKey is required for envelope encryption".into(),
        ));
    }

    req.data_type.parse().map_err(VaultError::Validation)
}

/// Validates the request and returns the bare reference hash.
pub fn validate_detokenize(req: &DetokenizeRequest) -> Result<String, VaultError> {
    if req.reference.is_empty() {
        return Err(VaultError::Validation("reference field is required".into()));
    }
    if req.purpose.is_empty() {
        return Err(VaultError::Validation("purpose field is required".into()));
    }
    if req.requesting_service.is_empty() {
        return Err(VaultError::Validation(
            "requestingService field is required".into(),
        ));
    }
    if req.organization_id.is_empty() {
        return Err(VaultError::Validation(
            "organizationId field is required for decryption".into(),
        ));
    }
    if req.organization_key.expose_secret().is_empty() {
        return Err(VaultError::Validation(
            "organizationKey is required for decryption".into(),
        ));
    }

    let hash = strip_reference(&req.reference);
    if !is_valid_reference_hash(hash) {
        return Err(VaultError::Validation("malformed reference".into()));
    }

    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::collections::HashMap;

    fn tokenize_request() -> TokenizeRequest {
        TokenizeRequest {
            data: SecretString::from("user@example.com"),
            data_type: "email".into(),
            client_id: "c1".into(),
            organization_id: "acme".into(),
            organization_key: SecretString::from("s3cret"),
            retention_policy: None,
            metadata: HashMap::new(),
        }
    }

    fn detokenize_request() -> DetokenizeRequest {
        DetokenizeRequest {
            reference: "tok_0123456789abcdef0123456789abcdef".into(),
            purpose: "support".into(),
            requesting_service: "crm".into(),
            requesting_user: None,
            organization_id: "acme".into(),
            organization_key: SecretString::from("s3cret"),
        }
    }

    #[test]
    fn test_valid_tokenize_passes() {
        assert_eq!(validate_tokenize(&tokenize_request()).unwrap(), DataType::Email);
    }

    #[test]
    fn test_tokenize_missing_fields_rejected() {
        let mut req = tokenize_request();
        req.data = SecretString::from("");
        assert!(matches!(
            validate_tokenize(&req),
            Err(VaultError::Validation(_))
        ));

        let mut req = tokenize_request();
        req.client_id.clear();
        assert!(validate_tokenize(&req).is_err());

        let mut req = tokenize_request();
        req.organization_id.clear();
        assert!(validate_tokenize(&req).is_err());

        let mut req = tokenize_request();
        req.organization_key = SecretString::from("");
        assert!(validate_tokenize(&req).is_err());
    }

    #[test]
    fn test_tokenize_unknown_data_type_rejected() {
        let mut req = tokenize_request();
        req.data_type = "passport".into();
        let err = validate_tokenize(&req).unwrap_err();
        assert!(err.to_string().contains("invalid dataType"));
    }

    #[test]
    fn test_detokenize_strips_prefix() {
        let hash = validate_detokenize(&detokenize_request()).unwrap();
        assert_eq!(hash, "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_detokenize_accepts_bare_hash() {
        let mut req = detokenize_request();
        req.reference = "0123456789abcdef0123456789abcdef".into();
        assert!(validate_detokenize(&req).is_ok());
    }

    #[test]
    fn test_detokenize_rejects_malformed_reference() {
        let mut req = detokenize_request();
        req.reference = "tok_short".into();
        assert!(matches!(
            validate_detokenize(&req),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_detokenize_missing_fields_rejected() {
        let mut req = detokenize_request();
        req.purpose.clear();
        assert!(validate_detokenize(&req).is_err());

        let mut req = detokenize_request();
        req.requesting_service.clear();
        assert!(validate_detokenize(&req).is_err());

        let mut req = detokenize_request();
        req.organization_key = SecretString::from("");
        assert!(validate_detokenize(&req).is_err());
    }
}
