//! Tokenize / Detokenize orchestration

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use pivault_core::{
    format_reference, DetokenizeRequest, DetokenizeResponse, HealthReport, HealthStatus,
    PiiRecord, RetentionPolicy, TekRecord, TokenizeRequest, TokenizeResponse, VaultError,
    TOKEN_TYPE,
};
use pivault_crypto::{aead, derive_field_key, generate_reference_hash};
use pivault_keys::{KekProvider, TekRegistry};
use pivault_store::{PersistQueue, StoreTokenMessage, TokenCache, TokenLookup, TokenStore};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use crate::validate::{validate_detokenize, validate_tokenize};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Applied when a request omits a retention policy.
    pub default_retention: RetentionPolicy,
    /// Accept tokenisation with the queue down, provided the cache
    /// write-through succeeded. Opens a documented non-durability window.
    pub cache_only_writes: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_retention: RetentionPolicy::OneDay,
            cache_only_writes: false,
        }
    }
}

pub struct Engine {
    registry: TekRegistry,
    kek: Arc<dyn KekProvider>,
    store: Arc<dyn TokenStore>,
    queue: Arc<dyn PersistQueue>,
    cache: Arc<dyn TokenCache>,
    audit: Arc<dyn AuditSink>,
    opts: EngineOptions,
}

impl Engine {
    pub fn new(
        registry: TekRegistry,
        kek: Arc<dyn KekProvider>,
        store: Arc<dyn TokenStore>,
        queue: Arc<dyn PersistQueue>,
        cache: Arc<dyn TokenCache>,
        audit: Arc<dyn AuditSink>,
        opts: EngineOptions,
    ) -> Self {
        Self {
            registry,
            kek,
            store,
            queue,
            cache,
            audit,
            opts,
        }
    }

    /// Seal a plaintext value and return an opaque reference for it.
    ///
    /// Two tokenisations of the same plaintext yield different references
    /// and different ciphertexts; the IV is fresh per seal.
    pub async fn tokenize(&self, req: TokenizeRequest) -> Result<TokenizeResponse, VaultError> {
        let data_type = validate_tokenize(&req)?;

        let retention = req
            .retention_policy
            .as_deref()
            .map(RetentionPolicy::parse_lenient)
            .unwrap_or(self.opts.default_retention);
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(retention.duration())
                .map_err(|e| VaultError::Internal(anyhow::anyhow!("retention overflow: {e}")))?;

        // Envelope: TEK (resolved or created) → FDK → seal
        let ork = req.organization_key.expose_secret().as_bytes();
        let tek_record = self.registry.resolve(&req.organization_id, ork).await?;
        let tek = self.registry.unwrap(&tek_record)?;
        let fdk = derive_field_key(&tek, ork)
            .map_err(|e| VaultError::Internal(anyhow::anyhow!("deriving field key: {e}")))?;
        drop(tek);

        let aad = aead::record_aad(&req.organization_id, data_type.as_str());
        let (iv, ciphertext) = aead::seal(&fdk, req.data.expose_secret().as_bytes(), &aad)
            .map_err(|e| VaultError::Internal(anyhow::anyhow!("sealing record: {e}")))?;
        drop(fdk);

        let reference_hash = generate_reference_hash();
        let record = PiiRecord {
            reference_hash: reference_hash.clone(),
            ciphertext,
            iv: iv.to_vec(),
            data_type,
            client_id: req.client_id.clone(),
            organization_id: req.organization_id.clone(),
            created_at: now,
            expires_at,
            updated_at: now,
            metadata: req.metadata.clone(),
        };

        // Write-through cache, then the durable-persist message. The upsert
        // itself happens asynchronously in the worker pool.
        let cache_ok = match self.cache.put(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(reference_hash = %record.reference_hash, "cache write-through failed: {e}");
                false
            }
        };

        if let Err(e) = self.queue.send(&StoreTokenMessage::from_record(&record)).await {
            if self.opts.cache_only_writes && cache_ok {
                warn!(
                    reference_hash = %record.reference_hash,
                    "queue unavailable, accepting cache-only write: {e}"
                );
            } else {
                return Err(VaultError::PersistUnavailable(format!(
                    "queue publish failed: {e}"
                )));
            }
        }

        self.audit
            .record(AuditEvent {
                operation: AuditOperation::Tokenize,
                outcome: AuditOutcome::Success,
                reference_hash: record.reference_hash.clone(),
                organization_id: record.organization_id.clone(),
                actor: req.client_id.clone(),
                purpose: None,
                requesting_user: None,
                occurred_at: now,
                metadata: req.metadata.clone(),
            })
            .await;

        info!(
            organization_id = %req.organization_id,
            data_type = %data_type,
            retention = retention.as_str(),
            "tokenized"
        );

        Ok(TokenizeResponse {
            reference: format_reference(&reference_hash),
            token_type: TOKEN_TYPE.to_string(),
            expires_at,
        })
    }

    /// Recover the plaintext behind a reference.
    ///
    /// Absent, expired, and cross-organization references are all
    /// `NotFound`; a wrong organization key is `DecryptionFailed`. Both map
    /// to the same external message.
    pub async fn detokenize(
        &self,
        req: DetokenizeRequest,
    ) -> Result<DetokenizeResponse, VaultError> {
        let reference_hash = validate_detokenize(&req)?;

        let record = self.retrieve(&reference_hash, &req.organization_id).await?;

        let ork = req.organization_key.expose_secret().as_bytes();
        let tek_record = match self.registry.resolve(&req.organization_id, ork).await {
            Ok(record) => record,
            Err(VaultError::OrkVerification) => {
                debug!(%reference_hash, "organization key hash mismatch");
                self.audit_detokenize(&record, &req, AuditOutcome::DecryptionFailed)
                    .await;
                return Err(VaultError::DecryptionFailed);
            }
            Err(e) => return Err(e),
        };

        let tek = self.registry.unwrap(&tek_record)?;
        let fdk = derive_field_key(&tek, ork)
            .map_err(|e| VaultError::Internal(anyhow::anyhow!("deriving field key: {e}")))?;
        drop(tek);

        let aad = aead::record_aad(&record.organization_id, record.data_type.as_str());
        let plaintext = match aead::open(&fdk, &record.iv, &record.ciphertext, &aad) {
            Ok(buf) => buf,
            Err(e) => {
                debug!(%reference_hash, "record decryption failed: {e}");
                self.audit_detokenize(&record, &req, AuditOutcome::DecryptionFailed)
                    .await;
                return Err(VaultError::DecryptionFailed);
            }
        };
        drop(fdk);

        let data = SecretString::from(
            plaintext
                .into_utf8()
                .map_err(|e| VaultError::Internal(anyhow::anyhow!("decoding plaintext: {e}")))?,
        );

        self.audit_detokenize(&record, &req, AuditOutcome::Success)
            .await;

        info!(
            organization_id = %req.organization_id,
            requesting_service = %req.requesting_service,
            "detokenized"
        );

        Ok(DetokenizeResponse {
            data,
            data_type: record.data_type,
            original_timestamp: record.created_at,
            access_logged: true,
        })
    }

    /// Cache first, store on miss. Store hits are deliberately not promoted
    /// into the cache: write-through is the only population path.
    async fn retrieve(
        &self,
        reference_hash: &str,
        organization_id: &str,
    ) -> Result<PiiRecord, VaultError> {
        match self.cache.get(reference_hash, organization_id).await {
            Ok(Some(record)) => {
                debug!(reference_hash, "cache hit");
                return Ok(record);
            }
            Ok(None) => {}
            Err(e) => {
                // A sick cache degrades to store reads.
                warn!(reference_hash, "cache read failed: {e}");
            }
        }

        match self
            .store
            .get_token(reference_hash, organization_id)
            .await
            .map_err(|e| VaultError::PersistUnavailable(format!("store lookup failed: {e}")))?
        {
            TokenLookup::Found(record) => Ok(record),
            TokenLookup::Expired => {
                debug!(reference_hash, "reference expired");
                Err(VaultError::NotFound)
            }
            TokenLookup::Missing => Err(VaultError::NotFound),
        }
    }

    async fn audit_detokenize(
        &self,
        record: &PiiRecord,
        req: &DetokenizeRequest,
        outcome: AuditOutcome,
    ) {
        let metadata = HashMap::from([("purpose".to_string(), req.purpose.clone())]);
        self.audit
            .record(AuditEvent {
                operation: AuditOperation::Detokenize,
                outcome,
                reference_hash: record.reference_hash.clone(),
                organization_id: req.organization_id.clone(),
                actor: req.requesting_service.clone(),
                purpose: Some(req.purpose.clone()),
                requesting_user: req.requesting_user.clone(),
                occurred_at: Utc::now(),
                metadata,
            })
            .await;
    }

    /// Aggregate component health for the readiness probe.
    pub async fn health_check(&self) -> HealthReport {
        let mut details = HashMap::new();

        details.insert(
            "kek".to_string(),
            match self.kek.kek() {
                Ok(_) => "healthy".to_string(),
                Err(e) => format!("unhealthy: {e}"),
            },
        );
        details.insert(
            "store".to_string(),
            match self.store.ping().await {
                Ok(()) => "healthy".to_string(),
                Err(e) => format!("unhealthy: {e}"),
            },
        );
        details.insert(
            "queue".to_string(),
            match self.queue.ping().await {
                Ok(()) => "healthy".to_string(),
                Err(e) => format!("unhealthy: {e}"),
            },
        );
        details.insert(
            "cache".to_string(),
            match self.cache.ping().await {
                Ok(()) => "healthy".to_string(),
                Err(e) => format!("unhealthy: {e}"),
            },
        );
        if let Ok(depth) = self.queue.depth().await {
            details.insert("queue_depth".to_string(), format!("{depth} messages"));
        }

        let status = if details
            .iter()
            .filter(|(key, _)| key.as_str() != "queue_depth")
            .all(|(_, value)| value == "healthy")
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport { status, details }
    }

    /// Administrative: install an externally wrapped TEK record (rotation
    /// tooling). Invalidates the in-process cache entry.
    pub async fn store_tek(&self, record: &TekRecord) -> Result<(), VaultError> {
        if record.organization_id.is_empty() {
            return Err(VaultError::Validation(
                "organizationId field is required".into(),
            ));
        }
        self.registry.store_wrapped(record).await
    }

    /// Administrative: fetch the wrapped TEK record after verifying the
    /// presented organization key. Never creates.
    pub async fn retrieve_tek(
        &self,
        organization_id: &str,
        organization_key: &SecretString,
    ) -> Result<TekRecord, VaultError> {
        if organization_id.is_empty() {
            return Err(VaultError::Validation(
                "organizationId field is required".into(),
            ));
        }
        if organization_key.expose_secret().is_empty() {
            return Err(VaultError::Validation(
                "organizationKey field is required".into(),
            ));
        }

        self.registry
            .lookup(organization_id, organization_key.expose_secret().as_bytes())
            .await?
            .ok_or(VaultError::NotFound)
    }

    /// Administrative: rotate an organization's TEK in place.
    pub async fn rotate_tek(
        &self,
        organization_id: &str,
        organization_key: &SecretString,
    ) -> Result<(), VaultError> {
        self.registry
            .rotate(
                organization_id,
                organization_key.expose_secret().as_bytes(),
            )
            .await
    }
}
