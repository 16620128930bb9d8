//! In-memory tier implementations
//!
//! Behaviourally faithful stand-ins for Postgres, PGMQ, and Redis: the queue
//! honours visibility timeouts, the store resolves TEK-creation races
//! atomically, and the cache applies the same org/expiry filtering as the
//! real tier. Used by the test suites and available to embedded deployments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pivault_core::{PiiRecord, TekRecord};

use crate::cache::TokenCache;
use crate::message::StoreTokenMessage;
use crate::queue::{PersistQueue, QueuedMessage};
use crate::store::{TekStore, TokenLookup, TokenStore};

#[derive(Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<String, PiiRecord>>,
    teks: Mutex<HashMap<String, TekRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.lock().expect("token map poisoned").len()
    }

    pub fn tek_count(&self) -> usize {
        self.teks.lock().expect("tek map poisoned").len()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn upsert_token(&self, record: &PiiRecord) -> Result<()> {
        let mut tokens = self.tokens.lock().expect("token map poisoned");
        let mut record = record.clone();
        record.updated_at = Utc::now();
        tokens.insert(record.reference_hash.clone(), record);
        Ok(())
    }

    async fn get_token(
        &self,
        reference_hash: &str,
        organization_id: &str,
    ) -> Result<TokenLookup> {
        let tokens = self.tokens.lock().expect("token map poisoned");
        let Some(record) = tokens.get(reference_hash) else {
            return Ok(TokenLookup::Missing);
        };
        if record.organization_id != organization_id {
            return Ok(TokenLookup::Missing);
        }
        if record.is_expired_at(Utc::now()) {
            return Ok(TokenLookup::Expired);
        }
        Ok(TokenLookup::Found(record.clone()))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut tokens = self.tokens.lock().expect("token map poisoned");
        let now = Utc::now();
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired_at(now));
        Ok((before - tokens.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TekStore for MemoryStore {
    async fn insert_tek(&self, record: &TekRecord) -> Result<bool> {
        let mut teks = self.teks.lock().expect("tek map poisoned");
        if teks.contains_key(&record.organization_id) {
            return Ok(false);
        }
        teks.insert(record.organization_id.clone(), record.clone());
        Ok(true)
    }

    async fn get_active_tek(&self, organization_id: &str) -> Result<Option<TekRecord>> {
        let teks = self.teks.lock().expect("tek map poisoned");
        Ok(teks
            .get(organization_id)
            .filter(|record| record.active)
            .cloned())
    }

    async fn rotate_tek(&self, record: &TekRecord) -> Result<()> {
        let mut teks = self.teks.lock().expect("tek map poisoned");
        let next = match teks.get(&record.organization_id) {
            Some(existing) => TekRecord {
                rotated_at: Some(Utc::now()),
                version: existing.version + 1,
                active: true,
                ..record.clone()
            },
            None => record.clone(),
        };
        teks.insert(record.organization_id.clone(), next);
        Ok(())
    }
}

struct QueuedEntry {
    msg_id: i64,
    body: serde_json::Value,
    visible_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    next_id: i64,
    entries: Vec<QueuedEntry>,
}

/// Queue with real visibility-timeout semantics: a read hides the message
/// until the timeout elapses; an unacknowledged message is redelivered.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistQueue for MemoryQueue {
    async fn send(&self, msg: &StoreTokenMessage) -> Result<()> {
        let mut state = self.state.lock().expect("queue poisoned");
        state.next_id += 1;
        let msg_id = state.next_id;
        state.entries.push(QueuedEntry {
            msg_id,
            body: msg.to_json()?,
            visible_at: Utc::now(),
        });
        Ok(())
    }

    async fn read_batch(
        &self,
        visibility_timeout: Duration,
        limit: i32,
    ) -> Result<Vec<QueuedMessage>> {
        let mut state = self.state.lock().expect("queue poisoned");
        let now = Utc::now();
        let hidden_until = now
            + chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut batch = Vec::new();
        for entry in state.entries.iter_mut() {
            if batch.len() >= limit as usize {
                break;
            }
            if entry.visible_at <= now {
                entry.visible_at = hidden_until;
                batch.push(QueuedMessage {
                    msg_id: entry.msg_id,
                    body: entry.body.clone(),
                });
            }
        }
        Ok(batch)
    }

    async fn delete(&self, msg_id: i64) -> Result<()> {
        let mut state = self.state.lock().expect("queue poisoned");
        state.entries.retain(|entry| entry.msg_id != msg_id);
        Ok(())
    }

    async fn depth(&self) -> Result<i64> {
        let state = self.state.lock().expect("queue poisoned");
        Ok(state.entries.len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, PiiRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenCache for MemoryCache {
    async fn put(&self, record: &PiiRecord) -> Result<()> {
        if record.is_expired_at(Utc::now()) {
            anyhow::bail!("refusing to cache an already-expired record");
        }
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.insert(record.reference_hash.clone(), record.clone());
        Ok(())
    }

    async fn get(
        &self,
        reference_hash: &str,
        organization_id: &str,
    ) -> Result<Option<PiiRecord>> {
        let mut entries = self.entries.lock().expect("cache poisoned");
        let Some(record) = entries.get(reference_hash) else {
            return Ok(None);
        };
        if record.organization_id != organization_id {
            return Ok(None);
        }
        if record.is_expired_at(Utc::now()) {
            entries.remove(reference_hash);
            return Ok(None);
        }
        Ok(Some(record.clone()))
    }

    async fn delete(&self, reference_hash: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.remove(reference_hash);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use pivault_core::DataType;

    fn record(reference_hash: &str, org: &str, ttl_hours: i64) -> PiiRecord {
        let now = Utc::now();
        PiiRecord {
            reference_hash: reference_hash.into(),
            ciphertext: vec![1, 2, 3],
            iv: vec![0u8; 12],
            data_type: DataType::Email,
            client_id: "c1".into(),
            organization_id: org.into(),
            created_at: now,
            expires_at: now + ChronoDuration::hours(ttl_hours),
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn store_filters_by_organization() {
        let store = MemoryStore::new();
        store.upsert_token(&record("r1", "acme", 24)).await.unwrap();

        assert!(matches!(
            store.get_token("r1", "acme").await.unwrap(),
            TokenLookup::Found(_)
        ));
        assert!(matches!(
            store.get_token("r1", "globex").await.unwrap(),
            TokenLookup::Missing
        ));
    }

    #[tokio::test]
    async fn store_reports_expired() {
        let store = MemoryStore::new();
        store.upsert_token(&record("r1", "acme", -1)).await.unwrap();
        assert!(matches!(
            store.get_token("r1", "acme").await.unwrap(),
            TokenLookup::Expired
        ));
    }

    #[tokio::test]
    async fn store_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let r = record("r1", "acme", 24);
        store.upsert_token(&r).await.unwrap();
        store.upsert_token(&r).await.unwrap();
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn purge_removes_expired_rows() {
        let store = MemoryStore::new();
        store.upsert_token(&record("live", "acme", 24)).await.unwrap();
        store.upsert_token(&record("dead", "acme", -1)).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn tek_insert_reports_conflict() {
        let store = MemoryStore::new();
        let tek = TekRecord {
            organization_id: "acme".into(),
            wrapped_tek: vec![1; 60],
            ork_hash: "abc".into(),
            created_at: Utc::now(),
            rotated_at: None,
            version: 1,
            active: true,
        };
        assert!(store.insert_tek(&tek).await.unwrap());
        assert!(!store.insert_tek(&tek).await.unwrap());
        assert_eq!(store.tek_count(), 1);
    }

    #[tokio::test]
    async fn queue_redelivers_after_visibility_timeout() {
        let queue = MemoryQueue::new();
        let msg = StoreTokenMessage::from_record(&record("r1", "acme", 24));
        queue.send(&msg).await.unwrap();

        // First read hides the message
        let batch = queue.read_batch(Duration::from_secs(300), 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        let again = queue.read_batch(Duration::from_secs(300), 10).await.unwrap();
        assert!(again.is_empty(), "hidden message must not be redelivered early");

        // Zero timeout: immediately visible again (simulates timeout elapsing)
        queue.send(&msg).await.unwrap();
        let first = queue.read_batch(Duration::ZERO, 10).await.unwrap();
        let second = queue.read_batch(Duration::ZERO, 10).await.unwrap();
        assert!(!first.is_empty());
        assert!(!second.is_empty(), "expired visibility must redeliver");
    }

    #[tokio::test]
    async fn queue_delete_acknowledges() {
        let queue = MemoryQueue::new();
        let msg = StoreTokenMessage::from_record(&record("r1", "acme", 24));
        queue.send(&msg).await.unwrap();

        let batch = queue.read_batch(Duration::ZERO, 10).await.unwrap();
        queue.delete(batch[0].msg_id).await.unwrap();

        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(queue.read_batch(Duration::ZERO, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_rejects_expired_and_filters_org() {
        let cache = MemoryCache::new();
        assert!(cache.put(&record("dead", "acme", -1)).await.is_err());

        cache.put(&record("r1", "acme", 24)).await.unwrap();
        assert!(cache.get("r1", "acme").await.unwrap().is_some());
        assert!(cache.get("r1", "globex").await.unwrap().is_none());
        assert!(cache.get("missing", "acme").await.unwrap().is_none());
    }
}
