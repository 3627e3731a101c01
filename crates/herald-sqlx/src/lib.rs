//! herald-sqlx
//!
//! Database adapters for herald-core on `sqlx`.
//!
//! - **SqliteOutboxStore**: `OutboxStore` over an `outbox_messages` table,
//!   plus `append_in` for writing envelopes inside a business transaction
//! - **SqliteLeaseStore**: `LeaseStore` (TTL leases) for `LeaseLockProvider`
//! - **PgAdvisoryLockProvider** (`postgres` feature): session advisory locks

#[cfg(feature = "postgres")]
pub mod pg_advisory;
pub mod sqlite_lease;
pub mod sqlite_store;

#[cfg(feature = "postgres")]
pub use pg_advisory::PgAdvisoryLockProvider;
pub use sqlite_lease::SqliteLeaseStore;
pub use sqlite_store::SqliteOutboxStore;
