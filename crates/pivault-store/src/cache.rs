//! Hot cache for encrypted PII records
//!
//! Keyed by `pii:token:{reference_hash}`. Entries are written only on the
//! write-through path (tokenisation and worker upsert); reads never promote
//! a store hit into the cache, so guessed references cannot warm it.
//!
//! TTL mirrors record expiry. Entries that fail revalidation on read (bad
//! base64, wrong IV length, unknown data type) are deleted and treated as
//! misses; an organization mismatch is a plain miss.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use pivault_core::config::CacheConfig;
use pivault_core::PiiRecord;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::message::StoreTokenMessage;

fn cache_key(reference_hash: &str) -> String {
    format!("pii:token:{reference_hash}")
}

#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Cache a record with TTL equal to its remaining lifetime.
    ///
    /// Fails if the record is already expired.
    async fn put(&self, record: &PiiRecord) -> Result<()>;

    /// Look up a record for an organization. Misses, expired entries,
    /// corrupted entries, and entries owned by other organizations all
    /// return `None`.
    async fn get(&self, reference_hash: &str, organization_id: &str)
        -> Result<Option<PiiRecord>>;

    async fn delete(&self, reference_hash: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

pub struct RedisCache {
    conn: ConnectionManager,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisCache {
    pub async fn connect(cfg: &CacheConfig) -> Result<Self> {
        let client = redis::Client::open(cfg.url.as_str()).context("parsing cache URL")?;
        let conn = tokio::time::timeout(
            Duration::from_millis(cfg.connect_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        .context("cache dial timed out")?
        .context("connecting to cache")?;

        Ok(Self {
            conn,
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
            write_timeout: Duration::from_millis(cfg.write_timeout_ms),
        })
    }
}

#[async_trait]
impl TokenCache for RedisCache {
    async fn put(&self, record: &PiiRecord) -> Result<()> {
        let now = Utc::now();
        let ttl = (record.expires_at - now).num_seconds();
        if ttl <= 0 {
            bail!("refusing to cache an already-expired record");
        }

        let body = serde_json::to_string(&StoreTokenMessage::from_record(record))
            .context("serializing cache entry")?;
        let key = cache_key(&record.reference_hash);

        let mut conn = self.conn.clone();
        tokio::time::timeout(self.write_timeout, async move {
            conn.set_ex::<_, _, ()>(&key, body, ttl as u64).await
        })
        .await
        .context("cache write timed out")?
        .context("writing cache entry")?;

        debug!(reference_hash = %record.reference_hash, ttl_secs = ttl, "record cached");
        Ok(())
    }

    async fn get(
        &self,
        reference_hash: &str,
        organization_id: &str,
    ) -> Result<Option<PiiRecord>> {
        let key = cache_key(reference_hash);

        let mut conn = self.conn.clone();
        let key_for_get = key.clone();
        let body: Option<String> = tokio::time::timeout(self.read_timeout, async move {
            conn.get::<_, Option<String>>(&key_for_get).await
        })
        .await
        .context("cache read timed out")?
        .context("reading cache entry")?;

        let Some(body) = body else {
            return Ok(None);
        };

        let record = serde_json::from_str::<StoreTokenMessage>(&body)
            .map_err(anyhow::Error::from)
            .and_then(StoreTokenMessage::into_record);

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                // Corrupted entry: remove so the next read goes to the store.
                warn!(reference_hash, "corrupted cache entry dropped: {e}");
                self.delete(reference_hash).await.ok();
                return Ok(None);
            }
        };

        if record.organization_id != organization_id {
            return Ok(None);
        }

        if record.is_expired_at(Utc::now()) {
            self.delete(reference_hash).await.ok();
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn delete(&self, reference_hash: &str) -> Result<()> {
        let key = cache_key(reference_hash);
        let mut conn = self.conn.clone();
        tokio::time::timeout(self.write_timeout, async move {
            conn.del::<_, ()>(&key).await
        })
        .await
        .context("cache delete timed out")?
        .context("deleting cache entry")?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(self.read_timeout, async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .context("cache ping timed out")?
        .context("pinging cache")?;
        Ok(())
    }
}

/// Cache tier for deployments with caching disabled.
///
/// Writes report success without storing anything, so `cache_only_writes`
/// must not be combined with this tier; it would accept requests with no
/// durability at all.
pub struct NoopCache;

#[async_trait]
impl TokenCache for NoopCache {
    async fn put(&self, _record: &PiiRecord) -> Result<()> {
        Ok(())
    }

    async fn get(
        &self,
        _reference_hash: &str,
        _organization_id: &str,
    ) -> Result<Option<PiiRecord>> {
        Ok(None)
    }

    async fn delete(&self, _reference_hash: &str) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
