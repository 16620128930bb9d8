//! Wire format shared by the persistence queue and the hot cache
//!
//! Byte fields travel base64-encoded inside a JSON body. Conversion back to
//! a [`PiiRecord`] revalidates everything a corrupted entry could break:
//! base64 payloads, the 12-byte IV, and the data-type enum.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use pivault_core::{DataType, PiiRecord};
use serde::{Deserialize, Serialize};

const IV_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreTokenMessage {
    pub reference_hash: String,
    pub ciphertext: String,
    pub iv: String,
    pub data_type: String,
    pub client_id: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StoreTokenMessage {
    pub fn from_record(record: &PiiRecord) -> Self {
        Self {
            reference_hash: record.reference_hash.clone(),
            ciphertext: BASE64.encode(&record.ciphertext),
            iv: BASE64.encode(&record.iv),
            data_type: record.data_type.as_str().to_string(),
            client_id: record.client_id.clone(),
            organization_id: record.organization_id.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            updated_at: record.updated_at,
            metadata: record.metadata.clone(),
        }
    }

    pub fn into_record(self) -> Result<PiiRecord> {
        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .context("invalid ciphertext encoding")?;
        let iv = BASE64.decode(&self.iv).context("invalid iv encoding")?;
        if iv.len() != IV_LEN {
            bail!("invalid IV length: {} bytes (expected {IV_LEN})", iv.len());
        }
        let data_type: DataType = self
            .data_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(PiiRecord {
            reference_hash: self.reference_hash,
            ciphertext,
            iv,
            data_type,
            client_id: self.client_id,
            organization_id: self.organization_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            updated_at: self.updated_at,
            metadata: self.metadata,
        })
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context("serializing persistence message")
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).context("deserializing persistence message")
    }
}
