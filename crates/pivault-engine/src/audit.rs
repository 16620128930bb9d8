//! Access-event emission
//!
//! Every successful tokenisation and every detokenisation attempt that
//! located a record produces exactly one event. Events carry who asked and
//! why, never the plaintext or any key material.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Tokenize,
    Detokenize,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Tokenize => "tokenize",
            AuditOperation::Detokenize => "detokenize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    DecryptionFailed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::DecryptionFailed => "decryption_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub operation: AuditOperation,
    pub outcome: AuditOutcome,
    pub reference_hash: String,
    pub organization_id: String,
    /// client_id for tokenize, requesting_service for detokenize
    pub actor: String,
    pub purpose: Option<String>,
    pub requesting_user: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits events as structured log lines under the `audit` target, where the
/// log shipper picks them up for the append-only audit sink.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            operation = event.operation.as_str(),
            outcome = event.outcome.as_str(),
            reference_hash = %event.reference_hash,
            organization_id = %event.organization_id,
            actor = %event.actor,
            purpose = event.purpose.as_deref().unwrap_or(""),
            requesting_user = event.requesting_user.as_deref().unwrap_or(""),
            "access event"
        );
    }
}

/// Buffers events for inspection; used by the test suites.
#[derive(Default)]
pub struct CollectingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl CollectingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit buffer poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for CollectingAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().expect("audit buffer poisoned").push(event);
    }
}
