//! pivault-keys: per-organization Tenant Encryption Key lifecycle
//!
//! TEKs are created on first use, stored only wrapped under the platform
//! KEK, and verified against the presented organization key's hash before
//! the unwrap-and-derive cost is paid. The in-process cache fills once per
//! organization; concurrent resolvers for the same organization wait on a
//! single fill.

pub mod kek;
pub mod registry;
pub mod tek;

pub use kek::{KekProvider, StaticKekProvider};
pub use registry::TekRegistry;
pub use tek::{unwrap_tek, wrap_tek};
