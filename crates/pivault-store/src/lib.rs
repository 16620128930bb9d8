//! pivault-store: persistence pipeline for encrypted PII records
//!
//! Three tiers and a pump:
//! - a Redis hot cache, populated by write-through only (reads never promote)
//! - a transactional message queue (PGMQ) carrying durable-persist messages
//! - a Postgres durable store holding `pii_tokens` and `organization_teks`
//! - a worker pool draining the queue into the store with at-least-once,
//!   idempotent semantics
//!
//! Each tier is a trait so the engine and tests can compose Postgres/Redis
//! against the in-memory implementations in [`memory`].

pub mod cache;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod purge;
pub mod queue;
pub mod store;
pub mod worker;

pub use cache::{NoopCache, RedisCache, TokenCache};
pub use memory::{MemoryCache, MemoryQueue, MemoryStore};
pub use message::StoreTokenMessage;
pub use postgres::PgStore;
pub use purge::spawn_purge;
pub use queue::{PersistQueue, PgmqQueue, QueuedMessage};
pub use store::{TekStore, TokenLookup, TokenStore};
pub use worker::{drain_once, spawn_workers, WorkerOptions, WorkerStats};
