//! Postgres session advisory locks.
//!
//! A held lock pins one pooled connection: the advisory lock belongs to that
//! session, so the connection must not go back to the pool until unlocked.
//! If the process dies the server ends the session and frees the lock.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::postgres::Postgres;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use herald_core::ports::{DistributedLock, Lease, LockError, LockHandle, LockProvider};

/// Advisory locks are keyed by `bigint`; names are hashed into that space.
pub fn advisory_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}

#[derive(Debug, Clone)]
pub struct PgAdvisoryLockProvider {
    pool: PgPool,
    retry_every: Duration,
}

impl PgAdvisoryLockProvider {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry_every: Duration::from_millis(50),
        }
    }

    pub fn with_retry_every(mut self, retry_every: Duration) -> Self {
        self.retry_every = retry_every;
        self
    }
}

impl LockProvider for PgAdvisoryLockProvider {
    fn create_lock(&self, name: &str) -> Box<dyn DistributedLock> {
        Box::new(PgAdvisoryLock {
            name: name.to_string(),
            key: advisory_key(name),
            pool: self.pool.clone(),
            retry_every: self.retry_every,
        })
    }
}

struct PgAdvisoryLock {
    name: String,
    key: i64,
    pool: PgPool,
    retry_every: Duration,
}

fn backend(e: sqlx::Error) -> LockError {
    LockError::Backend(e.to_string())
}

#[async_trait]
impl DistributedLock for PgAdvisoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError> {
        let deadline = Instant::now() + timeout;
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        loop {
            let taken: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(self.key)
                .fetch_one(&mut *conn)
                .await
                .map_err(backend)?;
            if taken {
                let lease = PgAdvisoryLease {
                    key: self.key,
                    conn: Mutex::new(Some(conn)),
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

struct PgAdvisoryLease {
    key: i64,
    conn: Mutex<Option<PoolConnection<Postgres>>>,
}

#[async_trait]
impl Lease for PgAdvisoryLease {
    async fn release(&self) -> Result<(), LockError> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;
        match unlocked {
            Ok(_) => Ok(()),
            Err(e) => {
                // Closing the session is the only other way to free the lock.
                let _ = conn.close().await;
                Err(backend(e))
            }
        }
    }
}
