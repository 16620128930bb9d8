//! Queue drainers: at-least-once consumption into the durable store
//!
//! Each worker loop reads a batch with a visibility timeout, then per
//! message: unmarshal → upsert → cache write-through → delete. An
//! unmarshallable message is deleted outright (poison pill); a store failure
//! leaves the message for redelivery after the timeout. Workers never retry
//! in-loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::TokenCache;
use crate::message::StoreTokenMessage;
use crate::queue::PersistQueue;
use crate::store::TokenStore;

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub visibility_timeout: Duration,
    pub read_batch_size: i32,
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            read_batch_size: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Shared throughput counters, exported as gauges by the daemon.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub poisoned: AtomicU64,
}

/// Start `count` drainers. Each stops when `shutdown` flips to true.
pub fn spawn_workers(
    count: usize,
    queue: Arc<dyn PersistQueue>,
    store: Arc<dyn TokenStore>,
    cache: Arc<dyn TokenCache>,
    opts: WorkerOptions,
    stats: Arc<WorkerStats>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    info!(count, "starting persistence workers");
    (1..=count)
        .map(|worker_id| {
            let queue = queue.clone();
            let store = store.clone();
            let cache = cache.clone();
            let stats = stats.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(opts.poll_interval);
                loop {
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                info!(worker_id, "worker shutting down");
                                return;
                            }
                        }
                        _ = ticker.tick() => {
                            match drain_once(&*queue, &*store, &*cache, &opts, &stats).await {
                                Ok(processed) if processed > 0 => {
                                    debug!(worker_id, processed, "batch drained");
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!(worker_id, "queue read failed: {e}");
                                }
                            }
                        }
                    }
                }
            })
        })
        .collect()
}

/// Read and process one batch. Returns the number of messages acknowledged.
pub async fn drain_once(
    queue: &dyn PersistQueue,
    store: &dyn TokenStore,
    cache: &dyn TokenCache,
    opts: &WorkerOptions,
    stats: &WorkerStats,
) -> Result<usize> {
    let batch = queue
        .read_batch(opts.visibility_timeout, opts.read_batch_size)
        .await?;

    let mut processed = 0;
    for message in batch {
        let record = StoreTokenMessage::from_json(message.body)
            .and_then(StoreTokenMessage::into_record);

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                // Poison pill: redelivery can never succeed, drop it.
                warn!(msg_id = message.msg_id, "dropping unmarshallable message: {e}");
                stats.poisoned.fetch_add(1, Ordering::Relaxed);
                if let Err(delete_err) = queue.delete(message.msg_id).await {
                    warn!(msg_id = message.msg_id, "poison delete failed: {delete_err}");
                }
                continue;
            }
        };

        if let Err(e) = store.upsert_token(&record).await {
            // Leave the message; it reappears after the visibility timeout.
            error!(
                msg_id = message.msg_id,
                reference_hash = %record.reference_hash,
                "store upsert failed, leaving message for redelivery: {e}"
            );
            stats.failed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if let Err(e) = cache.put(&record).await {
            // Cache refresh is best-effort once the row is durable.
            warn!(reference_hash = %record.reference_hash, "cache write-through failed: {e}");
        }

        if let Err(e) = queue.delete(message.msg_id).await {
            warn!(msg_id = message.msg_id, "delete after upsert failed: {e}");
            continue;
        }

        stats.processed.fetch_add(1, Ordering::Relaxed);
        processed += 1;
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryQueue, MemoryStore};
    use crate::store::TokenLookup;
    use chrono::{Duration as ChronoDuration, Utc};
    use pivault_core::{DataType, PiiRecord};
    use std::collections::HashMap;

    fn record(reference_hash: &str) -> PiiRecord {
        let now = Utc::now();
        PiiRecord {
            reference_hash: reference_hash.into(),
            ciphertext: vec![9, 9, 9],
            iv: vec![0u8; 12],
            data_type: DataType::Phone,
            client_id: "c1".into(),
            organization_id: "acme".into(),
            created_at: now,
            expires_at: now + ChronoDuration::hours(24),
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    fn test_opts() -> WorkerOptions {
        WorkerOptions {
            visibility_timeout: Duration::ZERO,
            read_batch_size: 10,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn drain_persists_caches_and_acks() {
        let queue = MemoryQueue::new();
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let stats = WorkerStats::default();

        queue
            .send(&StoreTokenMessage::from_record(&record("r1")))
            .await
            .unwrap();

        let processed = drain_once(&queue, &store, &cache, &test_opts(), &stats)
            .await
            .unwrap();

        assert_eq!(processed, 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(matches!(
            store.get_token("r1", "acme").await.unwrap(),
            TokenLookup::Found(_)
        ));
        assert!(cache.get("r1", "acme").await.unwrap().is_some());
        assert_eq!(stats.processed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn drain_deletes_poison_messages() {
        let queue = MemoryQueue::new();
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let stats = WorkerStats::default();

        let mut msg = StoreTokenMessage::from_record(&record("r1"));
        msg.iv = "@@@not-base64@@@".into();
        queue.send(&msg).await.unwrap();

        let processed = drain_once(&queue, &store, &cache, &test_opts(), &stats)
            .await
            .unwrap();

        assert_eq!(processed, 0);
        assert_eq!(queue.depth().await.unwrap(), 0, "poison must be deleted");
        assert_eq!(store.token_count(), 0);
        assert_eq!(stats.poisoned.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn replayed_message_is_idempotent() {
        let queue = MemoryQueue::new();
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        let stats = WorkerStats::default();

        let msg = StoreTokenMessage::from_record(&record("r1"));
        queue.send(&msg).await.unwrap();

        // Simulate a worker crash between upsert and delete: process the
        // batch by hand, skipping the ack.
        let batch = queue.read_batch(Duration::ZERO, 10).await.unwrap();
        let recovered = StoreTokenMessage::from_json(batch[0].body.clone())
            .unwrap()
            .into_record()
            .unwrap();
        store.upsert_token(&recovered).await.unwrap();

        // The visibility timeout elapses; a fresh worker drains the same
        // message and acknowledges it this time.
        let processed = drain_once(&queue, &store, &cache, &test_opts(), &stats)
            .await
            .unwrap();

        assert_eq!(processed, 1);
        assert_eq!(store.token_count(), 1, "replay must not duplicate the row");
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn workers_stop_on_shutdown() {
        let queue: Arc<dyn PersistQueue> = Arc::new(MemoryQueue::new());
        let store: Arc<dyn TokenStore> = Arc::new(MemoryStore::new());
        let cache: Arc<dyn TokenCache> = Arc::new(MemoryCache::new());
        let stats = Arc::new(WorkerStats::default());
        let (tx, rx) = watch::channel(false);

        let handles = spawn_workers(2, queue, store, cache, test_opts(), stats, rx);
        tx.send(true).unwrap();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("worker must exit promptly")
                .unwrap();
        }
    }
}
