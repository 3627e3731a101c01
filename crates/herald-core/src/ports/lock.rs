//! Distributed lock port - named, cross-process mutual exclusion.
//!
//! Used only to keep two nodes from dispatching the same envelope at once.
//! Ordinary entity mutations rely on the row version instead.
//!
//! # Contract
//! - `LockProvider::create_lock` is a pure factory (no I/O).
//! - `DistributedLock::try_acquire` waits at most `timeout` and returns
//!   `Ok(None)` when the lock stays busy. That is the common case, not an error.
//! - `LockHandle` releases on `release()` or on drop, exactly once.
//! - A crashed holder loses the lock: session end for advisory backends,
//!   TTL expiry for lease backends.
//!
//! # Implementations
//! - `impls::InMemoryAdvisoryLocks` (session scoped, in process)
//! - `impls::LeaseLockProvider` over a `LeaseStore` (TTL based)
//! - `herald-sqlx`: `SqliteLeaseStore`, `PgAdvisoryLockProvider`

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::MessageId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// An in-process primitive was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Grants named locks.
pub trait LockProvider: Send + Sync {
    fn create_lock(&self, name: &str) -> Box<dyn DistributedLock>;
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    fn name(&self) -> &str;

    /// Wait up to `timeout` (zero means a single attempt) for the lock.
    /// Cancellation ends the wait with `Ok(None)`.
    async fn try_acquire(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError>;
}

/// Backend-specific part of a held lock.
#[async_trait]
pub trait Lease: Send + Sync {
    async fn release(&self) -> Result<(), LockError>;
}

/// A held lock. Released by `release()` or, failing that, on drop.
pub struct LockHandle {
    name: String,
    lease: Option<Box<dyn Lease>>,
}

impl LockHandle {
    pub fn new(name: impl Into<String>, lease: Box<dyn Lease>) -> Self {
        Self {
            name: name.into(),
            lease: Some(lease),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.lease.is_none()
    }

    /// Release the lock. Calling it again is a no-op.
    pub async fn release(&mut self) -> Result<(), LockError> {
        match self.lease.take() {
            Some(lease) => lease.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = lease.release().await {
                        tracing::warn!(lock = %name, error = %e, "release on drop failed");
                    }
                });
            }
            Err(_) => {
                // Without a runtime the backend's crash path (session end / TTL) frees it.
                tracing::warn!(lock = %name, "lock handle dropped outside a runtime; not released");
            }
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("name", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Build a lock name following `{entity}:{operation}:{id}`: lowercase,
/// colon separated. Names show up in logs, so never pass secrets.
pub fn lock_name(entity: &str, operation: &str, id: &str) -> String {
    format!("{entity}:{operation}:{id}").to_lowercase()
}

/// Lock guarding the processing of one envelope.
pub fn message_lock_name(id: MessageId) -> String {
    lock_name("outbox", "message", &id.to_ulid_string())
}
