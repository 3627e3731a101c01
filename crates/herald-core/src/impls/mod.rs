//! Impls - in-process implementations of the ports.
//!
//! # Included
//! - **InMemoryOutboxStore**: outbox store for development and tests
//! - **InMemoryAdvisoryLocks**: session-scoped advisory locks
//! - **LeaseLockProvider**: TTL lease locks over any `LeaseStore`
//!
//! # Production implementations
//! Live in a separate crate:
//! - `herald-sqlx`: SqliteOutboxStore, SqliteLeaseStore, PgAdvisoryLockProvider

pub mod inmem_lock;
pub mod inmem_store;
pub mod lease;

pub use self::inmem_lock::{AdvisorySession, InMemoryAdvisoryLocks};
pub use self::inmem_store::InMemoryOutboxStore;
pub use self::lease::{InMemoryLeaseStore, LeaseLockProvider, LeaseStore};
