//! In-process advisory locks with session semantics.
//!
//! Mirrors what a relational advisory lock gives across processes: a lock
//! belongs to the session that took it and is freed when that session ends.
//! Each `AdvisorySession` plays the part of one node's database connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ports::{DistributedLock, Lease, LockError, LockHandle, LockProvider};

type SessionId = u64;

#[derive(Default)]
struct LockTable {
    holders: Mutex<HashMap<String, SessionId>>,
    released: Notify,
}

impl LockTable {
    fn try_take(&self, name: &str, session: SessionId) -> Result<bool, LockError> {
        let mut holders = self
            .holders
            .lock()
            .map_err(|_| LockError::Poisoned("advisory lock table poisoned".into()))?;
        if holders.contains_key(name) {
            return Ok(false);
        }
        holders.insert(name.to_string(), session);
        Ok(true)
    }

    fn release(&self, name: &str, session: SessionId) -> Result<(), LockError> {
        let mut holders = self
            .holders
            .lock()
            .map_err(|_| LockError::Poisoned("advisory lock table poisoned".into()))?;
        if holders.get(name) == Some(&session) {
            holders.remove(name);
            drop(holders);
            self.released.notify_waiters();
        }
        Ok(())
    }

    fn release_session(&self, session: SessionId) -> usize {
        let mut holders = match self.holders.lock() {
            Ok(holders) => holders,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = holders.len();
        holders.retain(|_, holder| *holder != session);
        let freed = before - holders.len();
        drop(holders);
        if freed > 0 {
            self.released.notify_waiters();
        }
        freed
    }

    fn held_by(&self, session: SessionId) -> usize {
        match self.holders.lock() {
            Ok(holders) => holders.values().filter(|h| **h == session).count(),
            Err(poisoned) => poisoned.into_inner().values().filter(|h| **h == session).count(),
        }
    }
}

/// Shared lock table; hand one `session()` to each simulated node.
#[derive(Clone, Default)]
pub struct InMemoryAdvisoryLocks {
    table: Arc<LockTable>,
    next_session: Arc<AtomicU64>,
}

impl InMemoryAdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> AdvisorySession {
        AdvisorySession {
            id: self.next_session.fetch_add(1, Ordering::Relaxed) + 1,
            table: self.table.clone(),
        }
    }
}

/// One node's session. Dropping it frees every lock it still holds, the way
/// a closed connection frees its advisory locks.
pub struct AdvisorySession {
    id: SessionId,
    table: Arc<LockTable>,
}

impl AdvisorySession {
    pub fn held_count(&self) -> usize {
        self.table.held_by(self.id)
    }

    /// End the session now, as if the connection died.
    pub fn terminate(&self) -> usize {
        self.table.release_session(self.id)
    }
}

impl Drop for AdvisorySession {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl LockProvider for AdvisorySession {
    fn create_lock(&self, name: &str) -> Box<dyn DistributedLock> {
        Box::new(AdvisoryLock {
            name: name.to_string(),
            session: self.id,
            table: self.table.clone(),
        })
    }
}

struct AdvisoryLock {
    name: String,
    session: SessionId,
    table: Arc<LockTable>,
}

#[async_trait]
impl DistributedLock for AdvisoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before trying so a release in between is not missed.
            let released = self.table.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.table.try_take(&self.name, self.session)? {
                let lease = AdvisoryLease {
                    name: self.name.clone(),
                    session: self.session,
                    table: self.table.clone(),
                };
                return Ok(Some(LockHandle::new(self.name.clone(), Box::new(lease))));
            }
            if timeout.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }
}

struct AdvisoryLease {
    name: String,
    session: SessionId,
    table: Arc<LockTable>,
}

#[async_trait]
impl Lease for AdvisoryLease {
    async fn release(&self) -> Result<(), LockError> {
        self.table.release(&self.name, self.session)
    }
}
