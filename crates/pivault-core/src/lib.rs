pub mod config;
pub mod error;
pub mod types;

pub use error::{VaultError, VaultResult};
pub use types::{
    format_reference, is_valid_reference_hash, strip_reference, DataType, DetokenizeRequest,
    DetokenizeResponse, HealthReport, HealthStatus, PiiRecord, RetentionPolicy, TekRecord,
    TokenizeRequest, TokenizeResponse,
};

/// Externally visible token type for envelope-encrypted PII records.
pub const TOKEN_TYPE: &str = "PII_TOKEN_V2_ENVELOPE";
