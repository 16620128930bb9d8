//! Postgres durable store for PII records and wrapped TEKs

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pivault_core::config::DatabaseConfig;
use pivault_core::{DataType, PiiRecord, TekRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, warn};

use crate::store::{TekStore, TokenLookup, TokenStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with the configured pool bounds and run pending migrations.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .min_connections(cfg.min_connections)
            .max_lifetime(Duration::from_secs(cfg.max_lifetime_secs))
            .acquire_timeout(Duration::from_secs(5))
            .connect(&cfg.url)
            .await
            .context("connecting to durable store")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running store migrations")
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn upsert_token(&self, record: &PiiRecord) -> Result<()> {
        let metadata =
            serde_json::to_value(&record.metadata).context("serializing record metadata")?;

        sqlx::query(
            r#"
            INSERT INTO pii_tokens
                (reference_hash, organization_id, ciphertext, iv, data_type,
                 client_id, created_at, expires_at, updated_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), $9)
            ON CONFLICT (reference_hash)
            DO UPDATE SET
                ciphertext = EXCLUDED.ciphertext,
                iv = EXCLUDED.iv,
                data_type = EXCLUDED.data_type,
                client_id = EXCLUDED.client_id,
                expires_at = EXCLUDED.expires_at,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&record.reference_hash)
        .bind(&record.organization_id)
        .bind(&record.ciphertext)
        .bind(&record.iv)
        .bind(record.data_type.as_str())
        .bind(&record.client_id)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .context("upserting pii token")?;

        debug!(reference_hash = %record.reference_hash, "token upserted");
        Ok(())
    }

    async fn get_token(
        &self,
        reference_hash: &str,
        organization_id: &str,
    ) -> Result<TokenLookup> {
        type Row = (
            Vec<u8>,
            Vec<u8>,
            String,
            String,
            DateTime<Utc>,
            DateTime<Utc>,
            DateTime<Utc>,
            serde_json::Value,
        );

        let row: Option<Row> = sqlx::query_as(
            r#"
            SELECT ciphertext, iv, data_type, client_id,
                   created_at, expires_at, updated_at, metadata
            FROM pii_tokens
            WHERE reference_hash = $1 AND organization_id = $2
            "#,
        )
        .bind(reference_hash)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .context("querying pii token")?;

        let Some((ciphertext, iv, data_type, client_id, created_at, expires_at, updated_at, metadata)) =
            row
        else {
            return Ok(TokenLookup::Missing);
        };

        if expires_at < Utc::now() {
            return Ok(TokenLookup::Expired);
        }

        let data_type: DataType = data_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!("stored data_type invalid: {e}"))?;

        let metadata: HashMap<String, String> =
            serde_json::from_value(metadata).unwrap_or_else(|e| {
                warn!(reference_hash, "stored metadata unreadable: {e}");
                HashMap::new()
            });

        Ok(TokenLookup::Found(PiiRecord {
            reference_hash: reference_hash.to_string(),
            ciphertext,
            iv,
            data_type,
            client_id,
            organization_id: organization_id.to_string(),
            created_at,
            expires_at,
            updated_at,
            metadata,
        }))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pii_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .context("purging expired tokens")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("pinging durable store")?;
        Ok(())
    }
}

#[async_trait]
impl TekStore for PgStore {
    async fn insert_tek(&self, record: &TekRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO organization_teks
                (organization_id, wrapped_tek, ork_hash, created_at, version, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (organization_id) DO NOTHING
            "#,
        )
        .bind(&record.organization_id)
        .bind(&record.wrapped_tek)
        .bind(&record.ork_hash)
        .bind(record.created_at)
        .bind(record.version)
        .execute(&self.pool)
        .await
        .context("inserting organization tek")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_active_tek(&self, organization_id: &str) -> Result<Option<TekRecord>> {
        type Row = (
            Vec<u8>,
            String,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            i32,
            bool,
        );

        let row: Option<Row> = sqlx::query_as(
            r#"
            SELECT wrapped_tek, ork_hash, created_at, rotated_at, version, active
            FROM organization_teks
            WHERE organization_id = $1 AND active
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .context("querying organization tek")?;

        Ok(row.map(
            |(wrapped_tek, ork_hash, created_at, rotated_at, version, active)| TekRecord {
                organization_id: organization_id.to_string(),
                wrapped_tek,
                ork_hash,
                created_at,
                rotated_at,
                version,
                active,
            },
        ))
    }

    async fn rotate_tek(&self, record: &TekRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_teks
                (organization_id, wrapped_tek, ork_hash, created_at, version, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (organization_id)
            DO UPDATE SET
                wrapped_tek = EXCLUDED.wrapped_tek,
                ork_hash = EXCLUDED.ork_hash,
                rotated_at = NOW(),
                version = organization_teks.version + 1,
                active = TRUE
            "#,
        )
        .bind(&record.organization_id)
        .bind(&record.wrapped_tek)
        .bind(&record.ork_hash)
        .bind(record.created_at)
        .bind(record.version)
        .execute(&self.pool)
        .await
        .context("rotating organization tek")?;

        Ok(())
    }
}
