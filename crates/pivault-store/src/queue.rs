//! Transactional persistence queue (PGMQ over Postgres)
//!
//! Delivery is at-least-once: a read hides the message for the visibility
//! timeout; only an explicit delete removes it. Consumers must be idempotent.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pivault_core::config::QueueConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::message::StoreTokenMessage;

/// A queue message awaiting idempotent consumption.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg_id: i64,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait PersistQueue: Send + Sync {
    async fn send(&self, msg: &StoreTokenMessage) -> Result<()>;

    /// Read up to `limit` messages, hiding them for `visibility_timeout`.
    async fn read_batch(
        &self,
        visibility_timeout: Duration,
        limit: i32,
    ) -> Result<Vec<QueuedMessage>>;

    /// Acknowledge (remove) a processed message.
    async fn delete(&self, msg_id: i64) -> Result<()>;

    /// Current queue depth, for health reporting.
    async fn depth(&self) -> Result<i64>;

    async fn ping(&self) -> Result<()>;
}

pub struct PgmqQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgmqQueue {
    pub async fn connect(cfg: &QueueConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .min_connections(cfg.min_connections)
            .max_lifetime(Duration::from_secs(cfg.max_lifetime_secs))
            .acquire_timeout(Duration::from_secs(5))
            .connect(&cfg.url)
            .await
            .context("connecting to queue store")?;

        Ok(Self {
            pool,
            queue_name: cfg.name.clone(),
        })
    }

    pub fn from_pool(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    /// Install the pgmq extension and create the queue if either is missing.
    pub async fn ensure_queue(&self) -> Result<()> {
        let (extension_installed,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'pgmq')",
        )
        .fetch_one(&self.pool)
        .await
        .context("checking pgmq extension")?;

        if !extension_installed {
            sqlx::query("CREATE EXTENSION IF NOT EXISTS pgmq CASCADE")
                .execute(&self.pool)
                .await
                .context("installing pgmq extension")?;
            info!("pgmq extension installed");
        }

        let (queue_exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM pgmq.meta WHERE queue_name = $1)",
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await
        .context("checking queue existence")?;

        if !queue_exists {
            sqlx::query("SELECT pgmq.create($1)")
                .bind(&self.queue_name)
                .execute(&self.pool)
                .await
                .context("creating queue")?;
            info!(queue = %self.queue_name, "queue created");
        }

        Ok(())
    }
}

#[async_trait]
impl PersistQueue for PgmqQueue {
    async fn send(&self, msg: &StoreTokenMessage) -> Result<()> {
        let body = msg.to_json()?;
        sqlx::query("SELECT pgmq.send($1::text, $2::jsonb)")
            .bind(&self.queue_name)
            .bind(body)
            .execute(&self.pool)
            .await
            .context("publishing persistence message")?;

        debug!(reference_hash = %msg.reference_hash, "message queued");
        Ok(())
    }

    async fn read_batch(
        &self,
        visibility_timeout: Duration,
        limit: i32,
    ) -> Result<Vec<QueuedMessage>> {
        let rows: Vec<(i64, serde_json::Value)> = sqlx::query_as(
            "SELECT msg_id, message FROM pgmq.read($1::text, $2::integer, $3::integer)",
        )
        .bind(&self.queue_name)
        .bind(visibility_timeout.as_secs() as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("reading persistence queue")?;

        Ok(rows
            .into_iter()
            .map(|(msg_id, body)| QueuedMessage { msg_id, body })
            .collect())
    }

    async fn delete(&self, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1::text, $2::bigint)")
            .bind(&self.queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .context("deleting queue message")?;
        Ok(())
    }

    async fn depth(&self) -> Result<i64> {
        // The queue name is an internal constant, not caller input; pgmq
        // exposes per-queue tables rather than a parameterised view.
        let query = format!("SELECT COUNT(*) FROM pgmq.q_{}", self.queue_name);
        let (depth,): (i64,) = sqlx::query_as(&query)
            .fetch_one(&self.pool)
            .await
            .context("reading queue depth")?;
        Ok(depth)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("pinging queue store")?;
        Ok(())
    }
}
