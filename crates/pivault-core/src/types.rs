use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Prefix carried by externally visible references.
pub const REFERENCE_PREFIX: &str = "tok_";

/// Length of the hex-encoded reference hash (16 random bytes).
pub const REFERENCE_HASH_LEN: usize = 32;

/// Kinds of PII the engine accepts. Anything else is rejected at validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Name,
    Address,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Ssn => "ssn",
            DataType::CreditCard => "credit_card",
            DataType::Name => "name",
            DataType::Address => "address",
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(DataType::Email),
            "phone" => Ok(DataType::Phone),
            "ssn" => Ok(DataType::Ssn),
            "credit_card" => Ok(DataType::CreditCard),
            "name" => Ok(DataType::Name),
            "address" => Ok(DataType::Address),
            other => Err(format!("invalid dataType: {other}")),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention policy controlling `expires_at` at tokenisation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    OneDay,
    SevenDays,
    ThirtyDays,
    OneYear,
    SevenYears,
}

impl RetentionPolicy {
    pub fn duration(&self) -> Duration {
        const HOUR: u64 = 3600;
        match self {
            RetentionPolicy::OneDay => Duration::from_secs(24 * HOUR),
            RetentionPolicy::SevenDays => Duration::from_secs(168 * HOUR),
            RetentionPolicy::ThirtyDays => Duration::from_secs(720 * HOUR),
            RetentionPolicy::OneYear => Duration::from_secs(8760 * HOUR),
            RetentionPolicy::SevenYears => Duration::from_secs(61320 * HOUR),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPolicy::OneDay => "1day",
            RetentionPolicy::SevenDays => "7days",
            RetentionPolicy::ThirtyDays => "30days",
            RetentionPolicy::OneYear => "1year",
            RetentionPolicy::SevenYears => "7years",
        }
    }

    /// Permissive parse: unrecognised values fall back to `1day`.
    ///
    /// This matches the historical wire contract. Callers that want to reject
    /// unknown policies instead should use the strict `FromStr` impl.
    pub fn parse_lenient(s: &str) -> Self {
        Self::from_str(s).unwrap_or(RetentionPolicy::OneDay)
    }
}

impl FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1day" => Ok(RetentionPolicy::OneDay),
            "7days" => Ok(RetentionPolicy::SevenDays),
            "30days" => Ok(RetentionPolicy::ThirtyDays),
            "1year" => Ok(RetentionPolicy::OneYear),
            "7years" => Ok(RetentionPolicy::SevenYears),
            other => Err(format!("unknown retention policy: {other}")),
        }
    }
}

/// Format a reference hash as an externally visible reference.
pub fn format_reference(reference_hash: &str) -> String {
    format!("{REFERENCE_PREFIX}{reference_hash}")
}

/// Strip the `tok_` prefix if present, returning the bare hash.
pub fn strip_reference(reference: &str) -> &str {
    reference.strip_prefix(REFERENCE_PREFIX).unwrap_or(reference)
}

/// True if `hash` is exactly 32 lowercase hex characters.
pub fn is_valid_reference_hash(hash: &str) -> bool {
    hash.len() == REFERENCE_HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// An encrypted PII record, the unit of storage across all tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiRecord {
    pub reference_hash: String,
    pub ciphertext: Vec<u8>,
    /// AES-GCM nonce, exactly 12 bytes.
    pub iv: Vec<u8>,
    pub data_type: DataType,
    pub client_id: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl PiiRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A Tenant Encryption Key record. The TEK itself is stored only wrapped
/// (12-byte nonce prepended to AES-GCM ciphertext under the KEK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TekRecord {
    pub organization_id: String,
    pub wrapped_tek: Vec<u8>,
    /// Hex-encoded SHA-256 of the organization key presented at creation.
    pub ork_hash: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub active: bool,
}

#[derive(Debug)]
pub struct TokenizeRequest {
    pub data: SecretString,
    pub data_type: String,
    pub client_id: String,
    pub organization_id: String,
    pub organization_key: SecretString,
    pub retention_policy: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct TokenizeResponse {
    /// `tok_` followed by 32 hex characters.
    pub reference: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DetokenizeRequest {
    pub reference: String,
    pub purpose: String,
    pub requesting_service: String,
    pub requesting_user: Option<String>,
    pub organization_id: String,
    pub organization_key: SecretString,
}

#[derive(Debug)]
pub struct DetokenizeResponse {
    pub data: SecretString,
    pub data_type: DataType,
    pub original_timestamp: DateTime<Utc>,
    pub access_logged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_round_trip() {
        for s in ["email", "phone", "ssn", "credit_card", "name", "address"] {
            let dt: DataType = s.parse().unwrap();
            assert_eq!(dt.as_str(), s);
        }
        assert!("passport".parse::<DataType>().is_err());
        assert!("".parse::<DataType>().is_err());
    }

    #[test]
    fn test_retention_durations() {
        assert_eq!(
            RetentionPolicy::OneDay.duration(),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            RetentionPolicy::SevenDays.duration(),
            Duration::from_secs(168 * 3600)
        );
        assert_eq!(
            RetentionPolicy::ThirtyDays.duration(),
            Duration::from_secs(720 * 3600)
        );
        assert_eq!(
            RetentionPolicy::OneYear.duration(),
            Duration::from_secs(8760 * 3600)
        );
        assert_eq!(
            RetentionPolicy::SevenYears.duration(),
            Duration::from_secs(61320 * 3600)
        );
    }

    #[test]
    fn test_retention_lenient_falls_back_to_one_day() {
        assert_eq!(
            RetentionPolicy::parse_lenient("90days"),
            RetentionPolicy::OneDay
        );
        assert_eq!(RetentionPolicy::parse_lenient(""), RetentionPolicy::OneDay);
        assert_eq!(
            RetentionPolicy::parse_lenient("7years"),
            RetentionPolicy::SevenYears
        );
    }

    #[test]
    fn test_strict_retention_rejects_unknown() {
        assert!("90days".parse::<RetentionPolicy>().is_err());
    }

    #[test]
    fn test_reference_helpers() {
        let hash = "0123456789abcdef0123456789abcdef";
        let reference = format_reference(hash);
        assert_eq!(reference, "tok_0123456789abcdef0123456789abcdef");
        assert_eq!(strip_reference(&reference), hash);
        // Bare hashes are accepted too
        assert_eq!(strip_reference(hash), hash);
    }

    #[test]
    fn test_reference_hash_format() {
        assert!(is_valid_reference_hash("0123456789abcdef0123456789abcdef"));
        // Too short
        assert!(!is_valid_reference_hash("0123456789abcdef"));
        // Uppercase rejected
        assert!(!is_valid_reference_hash("0123456789ABCDEF0123456789ABCDEF"));
        // Non-hex rejected
        assert!(!is_valid_reference_hash("0123456789abcdeg0123456789abcdef"));
    }
}
