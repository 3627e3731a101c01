//! SQLite lease table for `LeaseLockProvider`.
//!
//! A lease row is taken with one upsert that only overwrites an expired
//! row, so two nodes can never both see `true` for the same name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use herald_core::impls::LeaseStore;
use herald_core::ports::LockError;

#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), LockError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_leases (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> LockError {
    LockError::Backend(e.to_string())
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn try_insert(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_leases (name, owner, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE
            SET owner = excluded.owner, expires_at = excluded.expires_at
            WHERE outbox_leases.expires_at <= ?
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(expires_at.timestamp_micros())
        .bind(now.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, name: &str, owner: &str) -> Result<(), LockError> {
        sqlx::query("DELETE FROM outbox_leases WHERE name = ? AND owner = ?")
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
