//! TEK registry: resolve-or-create with a per-organization fill-once cache
//!
//! The cache maps organization id → slot; a slot's async lock makes the
//! first resolver for an organization perform the (store read / create)
//! fill while concurrent resolvers for the same organization wait on it.
//! Creation races across processes are settled by the store's conflict-free
//! insert: the loser re-reads the winner's row.
//!
//! The stored `ork_hash` comparison is an early-failure gate that keeps the
//! unwrap-and-derive cost off the path for wrong keys; the AES-GCM tag check
//! during decryption remains authoritative.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use pivault_core::{TekRecord, VaultError};
use pivault_crypto::{constant_time_eq, sha256_hex, SecretKey};
use pivault_store::TekStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::kek::KekProvider;
use crate::tek::{unwrap_tek, wrap_tek};

type Slot = Arc<Mutex<Option<TekRecord>>>;

pub struct TekRegistry {
    kek: Arc<dyn KekProvider>,
    store: Arc<dyn TekStore>,
    slots: DashMap<String, Slot>,
    capacity: usize,
}

impl TekRegistry {
    pub fn new(kek: Arc<dyn KekProvider>, store: Arc<dyn TekStore>, capacity: usize) -> Self {
        Self {
            kek,
            store,
            slots: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Resolve the organization's TEK, creating one on first use.
    pub async fn resolve(&self, organization_id: &str, ork: &[u8]) -> Result<TekRecord, VaultError> {
        self.resolve_inner(organization_id, ork, true)
            .await?
            .ok_or_else(|| VaultError::Internal(anyhow::anyhow!("TEK resolution returned nothing")))
    }

    /// Resolve without creating. `None` means the organization has no TEK.
    pub async fn lookup(
        &self,
        organization_id: &str,
        ork: &[u8],
    ) -> Result<Option<TekRecord>, VaultError> {
        self.resolve_inner(organization_id, ork, false).await
    }

    async fn resolve_inner(
        &self,
        organization_id: &str,
        ork: &[u8],
        create: bool,
    ) -> Result<Option<TekRecord>, VaultError> {
        let presented_hash = sha256_hex(ork);
        let slot = self.slot(organization_id);
        let mut guard = slot.lock().await;

        if let Some(record) = guard.as_ref() {
            if constant_time_eq(record.ork_hash.as_bytes(), presented_hash.as_bytes()) {
                return Ok(Some(record.clone()));
            }
            // Mismatch against the cached copy: drop it and re-check the
            // store, which may hold a rotated record.
            warn!(organization_id, "cached TEK key hash mismatch, reloading");
            *guard = None;
        }

        let stored = self
            .store
            .get_active_tek(organization_id)
            .await
            .map_err(|e| VaultError::PersistUnavailable(e.to_string()))?;

        if let Some(record) = stored {
            if !constant_time_eq(record.ork_hash.as_bytes(), presented_hash.as_bytes()) {
                return Err(VaultError::OrkVerification);
            }
            debug!(organization_id, version = record.version, "TEK loaded");
            *guard = Some(record.clone());
            return Ok(Some(record));
        }

        if !create {
            return Ok(None);
        }

        let record = self
            .create_tek(organization_id, presented_hash.clone())
            .await?;

        // A concurrent creator may have won; adopt whichever row is durable.
        if !constant_time_eq(record.ork_hash.as_bytes(), presented_hash.as_bytes()) {
            return Err(VaultError::OrkVerification);
        }

        *guard = Some(record.clone());
        Ok(Some(record))
    }

    async fn create_tek(
        &self,
        organization_id: &str,
        ork_hash: String,
    ) -> Result<TekRecord, VaultError> {
        let tek = SecretKey::generate();
        let kek = self.kek.kek()?;
        let wrapped_tek = wrap_tek(&kek, &tek, organization_id).map_err(VaultError::Internal)?;

        let record = TekRecord {
            organization_id: organization_id.to_string(),
            wrapped_tek,
            ork_hash,
            created_at: Utc::now(),
            rotated_at: None,
            version: 1,
            active: true,
        };

        let created = self
            .store
            .insert_tek(&record)
            .await
            .map_err(|e| VaultError::PersistUnavailable(e.to_string()))?;

        if created {
            info!(organization_id, "TEK created");
            return Ok(record);
        }

        // Lost the creation race: the winner's row is authoritative.
        self.store
            .get_active_tek(organization_id)
            .await
            .map_err(|e| VaultError::PersistUnavailable(e.to_string()))?
            .ok_or_else(|| {
                VaultError::Internal(anyhow::anyhow!(
                    "TEK row missing after insert conflict for {organization_id}"
                ))
            })
    }

    /// Unwrap a resolved TEK. The caller lets the returned key drop after
    /// deriving from it.
    pub fn unwrap(&self, record: &TekRecord) -> Result<SecretKey, VaultError> {
        let kek = self.kek.kek()?;
        unwrap_tek(&kek, &record.wrapped_tek, &record.organization_id)
            .map_err(VaultError::Internal)
    }

    /// Rotate the organization's TEK (administrative). The store bumps the
    /// version and stamps `rotated_at`; the cache entry is invalidated.
    pub async fn rotate(&self, organization_id: &str, ork: &[u8]) -> Result<(), VaultError> {
        let tek = SecretKey::generate();
        let kek = self.kek.kek()?;
        let wrapped_tek = wrap_tek(&kek, &tek, organization_id).map_err(VaultError::Internal)?;

        let record = TekRecord {
            organization_id: organization_id.to_string(),
            wrapped_tek,
            ork_hash: sha256_hex(ork),
            created_at: Utc::now(),
            rotated_at: None,
            version: 1,
            active: true,
        };

        self.store
            .rotate_tek(&record)
            .await
            .map_err(|e| VaultError::PersistUnavailable(e.to_string()))?;

        self.invalidate(organization_id);
        info!(organization_id, "TEK rotated");
        Ok(())
    }

    /// Store an externally wrapped TEK record (out-of-band rotation tooling).
    pub async fn store_wrapped(&self, record: &TekRecord) -> Result<(), VaultError> {
        self.store
            .rotate_tek(record)
            .await
            .map_err(|e| VaultError::PersistUnavailable(e.to_string()))?;
        self.invalidate(&record.organization_id);
        Ok(())
    }

    pub fn invalidate(&self, organization_id: &str) {
        self.slots.remove(organization_id);
    }

    fn slot(&self, organization_id: &str) -> Slot {
        if let Some(slot) = self.slots.get(organization_id) {
            return slot.clone();
        }

        // Bounded cache: make room before admitting a new organization.
        if self.slots.len() >= self.capacity {
            let victim = self
                .slots
                .iter()
                .map(|entry| entry.key().clone())
                .find(|key| key != organization_id);
            if let Some(victim) = victim {
                debug!(evicted = %victim, "TEK cache at capacity, evicting");
                self.slots.remove(&victim);
            }
        }

        self.slots
            .entry(organization_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kek::StaticKekProvider;
    use pivault_store::MemoryStore;

    fn registry_with(store: Arc<MemoryStore>) -> TekRegistry {
        let kek = Arc::new(StaticKekProvider::new(SecretKey::generate()));
        TekRegistry::new(kek, store, 64)
    }

    #[tokio::test]
    async fn creates_tek_on_first_use() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone());

        let record = registry.resolve("acme", b"s3cret").await.unwrap();
        assert_eq!(record.version, 1);
        assert!(record.active);
        assert_eq!(record.ork_hash, sha256_hex(b"s3cret"));
        assert_eq!(store.tek_count(), 1);

        // Unwrap must yield a usable 32-byte key
        let tek = registry.unwrap(&record).unwrap();
        assert_eq!(tek.as_bytes().len(), 32);
    }

    #[tokio::test]
    async fn resolves_same_record_on_repeat() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone());

        let first = registry.resolve("acme", b"s3cret").await.unwrap();
        let second = registry.resolve("acme", b"s3cret").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.tek_count(), 1);
    }

    #[tokio::test]
    async fn wrong_ork_fails_verification() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone());

        registry.resolve("acme", b"s3cret").await.unwrap();
        let err = registry.resolve("acme", b"wrong").await.unwrap_err();
        assert!(matches!(err, VaultError::OrkVerification));

        // Wrong key must not clobber the real TEK
        assert_eq!(store.tek_count(), 1);
        assert!(registry.resolve("acme", b"s3cret").await.is_ok());
    }

    #[tokio::test]
    async fn lookup_does_not_create() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone());

        assert!(registry.lookup("acme", b"s3cret").await.unwrap().is_none());
        assert_eq!(store.tek_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_single_tek() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(registry_with(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.resolve("acme", b"shared-secret").await
            }));
        }

        let mut records = Vec::new();
        for handle in handles {
            records.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(store.tek_count(), 1, "exactly one TEK row must exist");
        for record in &records[1..] {
            assert_eq!(record.wrapped_tek, records[0].wrapped_tek);
        }
    }

    #[tokio::test]
    async fn rotation_bumps_version_and_invalidates_cache() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone());

        let before = registry.resolve("acme", b"s3cret").await.unwrap();
        registry.rotate("acme", b"s3cret").await.unwrap();
        let after = registry.resolve("acme", b"s3cret").await.unwrap();

        assert_eq!(after.version, before.version + 1);
        assert!(after.rotated_at.is_some());
        assert_ne!(after.wrapped_tek, before.wrapped_tek);
    }

    #[tokio::test]
    async fn cache_capacity_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let kek = Arc::new(StaticKekProvider::new(SecretKey::generate()));
        let registry = TekRegistry::new(kek, store, 2);

        registry.resolve("org-a", b"ka").await.unwrap();
        registry.resolve("org-b", b"kb").await.unwrap();
        registry.resolve("org-c", b"kc").await.unwrap();

        assert!(registry.slots.len() <= 2);
        // Evicted organizations still resolve from the store
        assert!(registry.resolve("org-a", b"ka").await.is_ok());
    }
}
