//! Durable-store traits

use anyhow::Result;
use async_trait::async_trait;
use pivault_core::{PiiRecord, TekRecord};

/// Outcome of a durable-store token lookup.
///
/// `Expired` and `Missing` are distinguished here so the caller can log the
/// difference; externally both surface as not-found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Found(PiiRecord),
    Expired,
    Missing,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or replace a record keyed by `reference_hash`.
    ///
    /// Replays of the same message hit the same row, which is what makes
    /// at-least-once queue delivery safe.
    async fn upsert_token(&self, record: &PiiRecord) -> Result<()>;

    /// Fetch a record. Filters by both `reference_hash` and
    /// `organization_id`; a row owned by another organization is `Missing`.
    async fn get_token(&self, reference_hash: &str, organization_id: &str)
        -> Result<TokenLookup>;

    /// Delete rows past their `expires_at`. Returns the count removed.
    async fn purge_expired(&self) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait TekStore: Send + Sync {
    /// Create the organization's TEK row if none exists.
    ///
    /// Returns `false` when a concurrent creator won the race; the caller
    /// re-reads the winning row.
    async fn insert_tek(&self, record: &TekRecord) -> Result<bool>;

    async fn get_active_tek(&self, organization_id: &str) -> Result<Option<TekRecord>>;

    /// Replace the organization's TEK, bumping the version and stamping
    /// `rotated_at`. Administrative path only.
    async fn rotate_tek(&self, record: &TekRecord) -> Result<()>;
}
