//! Lease locks - named locks kept as rows with an expiry in a key-value store.
//!
//! A holder that crashes never releases; its lease simply expires after
//! `ttl`. Each acquisition gets a fresh owner token, so releasing an expired
//! lease can never free a lease somebody else took over in the meantime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::ports::{Clock, DistributedLock, Lease, LockError, LockHandle, LockProvider, SystemClock};

/// Storage of leases: `name -> (owner, expires_at)`.
///
/// # Implementations
/// - `InMemoryLeaseStore` (tests, single process)
/// - `herald-sqlx`: `SqliteLeaseStore`
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take `name` for `owner` unless an unexpired lease exists. Returns whether it was taken.
    async fn try_insert(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LockError>;

    /// Drop the lease if `owner` still holds it.
    async fn remove(&self, name: &str, owner: &str) -> Result<(), LockError>;
}

/// Lock provider over any `LeaseStore`.
pub struct LeaseLockProvider<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    node_id: String,
    retry_every: Duration,
}

impl<S: LeaseStore + 'static> LeaseLockProvider<S> {
    pub fn new(store: Arc<S>, node_id: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl,
            node_id: node_id.into(),
            retry_every: Duration::from_millis(50),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Polling period while waiting on a busy lease.
    pub fn with_retry_every(mut self, retry_every: Duration) -> Self {
        self.retry_every = retry_every;
        self
    }
}

impl<S: LeaseStore + 'static> LockProvider for LeaseLockProvider<S> {
    fn create_lock(&self, name: &str) -> Box<dyn DistributedLock> {
        Box::new(LeaseLock {
            name: name.to_string(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            ttl: self.ttl,
            node_id: self.node_id.clone(),
            retry_every: self.retry_every,
        })
    }
}

struct LeaseLock<S> {
    name: String,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    node_id: String,
    retry_every: Duration,
}

#[async_trait]
impl<S: LeaseStore + 'static> DistributedLock for LeaseLock<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError> {
        let owner = format!("{}:{}", self.node_id, Ulid::new());
        let deadline = Instant::now() + timeout;
        loop {
            let now = self.clock.now();
            if self.store.try_insert(&self.name, &owner, now, now + self.ttl).await? {
                let lease = StoreLease {
                    name: self.name.clone(),
                    owner,
                    store: self.store.clone(),
                };
                return Ok(Some(LockHandle::new(self.name.clone(), Box::new(lease))));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining.min(self.retry_every)) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }
}

struct StoreLease<S> {
    name: String,
    owner: String,
    store: Arc<S>,
}

#[async_trait]
impl<S: LeaseStore + 'static> Lease for StoreLease<S> {
    async fn release(&self) -> Result<(), LockError> {
        self.store.remove(&self.name, &self.owner).await
    }
}

/// Lease table in process memory.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn holder(&self, name: &str) -> Option<String> {
        self.leases.lock().await.get(name).map(|(owner, _)| owner.clone())
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_insert(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().await;
        if let Some((_, current_expiry)) = leases.get(name)
            && *current_expiry > now
        {
            return Ok(false);
        }
        leases.insert(name.to_string(), (owner.to_string(), expires_at));
        Ok(true)
    }

    async fn remove(&self, name: &str, owner: &str) -> Result<(), LockError> {
        let mut leases = self.leases.lock().await;
        if leases.get(name).is_some_and(|(holder, _)| holder == owner) {
            leases.remove(name);
        }
        Ok(())
    }
}
