//! pivault-engine: tokenisation orchestration
//!
//! Ties the crypto primitives, the TEK registry, and the persistence
//! pipeline together behind two operations:
//!
//! - `tokenize`: validate → resolve-or-create TEK → derive the field data
//!   key → seal → allocate a reference → cache write-through → queue the
//!   durable persist → audit
//! - `detokenize`: validate → cache-then-store lookup → verify the
//!   organization key → derive → open → audit
//!
//! Secrets (organization keys, unwrapped TEKs, field keys, plaintext PII)
//! ride in zeroising containers on every path, including errors.

pub mod audit;
pub mod engine;
pub mod validate;

pub use audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink, CollectingAuditSink, TracingAuditSink};
pub use engine::{Engine, EngineOptions};
