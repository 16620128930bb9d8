//! Periodic deletion of expired rows
//!
//! Needs no coordination with readers: every read path already filters by
//! `expires_at`, so a row observed between expiry and purge is still
//! reported as expired.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::TokenStore;

pub fn spawn_purge(
    store: Arc<dyn TokenStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would purge at startup; skip it so the
        // daemon finishes coming up first.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("purge task shutting down");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "expired tokens purged"),
                        Err(e) => warn!("purge failed: {e}"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::TokenStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use pivault_core::{DataType, PiiRecord};
    use std::collections::HashMap;

    #[tokio::test]
    async fn purge_loop_removes_expired_rows() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .upsert_token(&PiiRecord {
                reference_hash: "dead".into(),
                ciphertext: vec![1],
                iv: vec![0u8; 12],
                data_type: DataType::Email,
                client_id: "c1".into(),
                organization_id: "acme".into(),
                created_at: now - ChronoDuration::hours(48),
                expires_at: now - ChronoDuration::hours(24),
                updated_at: now,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_purge(store.clone(), Duration::from_millis(20), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.token_count(), 0);
    }
}
