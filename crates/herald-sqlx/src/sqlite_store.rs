//! SQLite outbox store.
//!
//! Timestamps are stored as UTC microseconds so ordering and range filters
//! are plain integer comparisons. Ids are stored as bare ULID text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use herald_core::domain::{MessageId, OutboxMessage, OutboxStatus, StatusCounts};
use herald_core::ports::{OutboxStore, StoreError};

const COLUMNS: &str = "id, event_type, content, occurred_on_utc, status, processed_on_utc, error, \
                       processed_by_machine, processing_started_on_utc, is_deleted, row_version";

#[derive(Debug, Clone)]
pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the table and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_messages (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                content TEXT NOT NULL,
                occurred_on_utc INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                processed_on_utc INTEGER,
                error TEXT,
                processed_by_machine TEXT,
                processing_started_on_utc INTEGER,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                row_version INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_messages(status, occurred_on_utc, id)
            WHERE is_deleted = 0
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_processed
            ON outbox_messages(status, processed_on_utc)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Insert envelopes on a caller-owned connection, typically inside the
    /// same transaction as the business change that raised them.
    ///
    /// ```ignore
    /// let mut tx = store.pool().begin().await?;
    /// sqlx::query("INSERT INTO orders ...").execute(&mut *tx).await?;
    /// SqliteOutboxStore::append_in(&mut tx, &uow.into_messages()).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn append_in(conn: &mut SqliteConnection, messages: &[OutboxMessage]) -> Result<(), StoreError> {
        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO outbox_messages (
                    id, event_type, content, occurred_on_utc, status, processed_on_utc, error,
                    processed_by_machine, processing_started_on_utc, is_deleted, row_version
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(message.id().to_ulid_string())
            .bind(message.event_type())
            .bind(message.content())
            .bind(micros(message.occurred_on_utc()))
            .bind(message.status().as_str())
            .bind(message.processed_on_utc().map(micros))
            .bind(message.error())
            .bind(message.processed_by_machine())
            .bind(message.processing_started_on_utc().map(micros))
            .bind(message.is_deleted())
            .bind(message.row_version() as i64)
            .execute(&mut *conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(message.id()),
                other => backend(other),
            })?;
        }
        Ok(())
    }

    async fn fetch(&self, sql: &str, binds: (i64, i64)) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(binds.0)
            .bind(binds.1)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_message).collect()
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(column: &str, value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Backend(format!("{column} out of range: {value}")))
}

fn parse_status(text: &str) -> Result<OutboxStatus, StoreError> {
    text.parse::<OutboxStatus>()
        .map_err(|e| StoreError::Backend(e.to_string()))
}

fn row_to_message(row: &SqliteRow) -> Result<OutboxMessage, StoreError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let id: MessageId = id
        .parse()
        .map_err(|e| StoreError::Backend(format!("invalid message id '{id}': {e}")))?;
    let status: String = row.try_get("status").map_err(backend)?;
    let status = parse_status(&status)?;

    let occurred: i64 = row.try_get("occurred_on_utc").map_err(backend)?;
    let processed: Option<i64> = row.try_get("processed_on_utc").map_err(backend)?;
    let started: Option<i64> = row.try_get("processing_started_on_utc").map_err(backend)?;
    let row_version: i64 = row.try_get("row_version").map_err(backend)?;

    Ok(OutboxMessage::restore(
        id,
        row.try_get("event_type").map_err(backend)?,
        row.try_get("content").map_err(backend)?,
        from_micros("occurred_on_utc", occurred)?,
        status,
        processed.map(|v| from_micros("processed_on_utc", v)).transpose()?,
        row.try_get("error").map_err(backend)?,
        row.try_get("processed_by_machine").map_err(backend)?,
        started.map(|v| from_micros("processing_started_on_utc", v)).transpose()?,
        row.try_get("is_deleted").map_err(backend)?,
        row_version as u64,
    ))
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::append_in(&mut tx, &messages).await?;
        tx.commit().await.map_err(backend)
    }

    async fn query_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_messages \
             WHERE status = 'pending' AND processed_on_utc IS NULL AND is_deleted = 0 \
             AND occurred_on_utc <= ? \
             ORDER BY occurred_on_utc, id LIMIT ?"
        );
        self.fetch(&sql, (micros(now), limit as i64)).await
    }

    async fn query_status(&self, id: MessageId) -> Result<Option<OutboxStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ? AND is_deleted = 0")
                .bind(id.to_ulid_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        status.as_deref().map(parse_status).transpose()
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM outbox_messages WHERE id = ?"))
            .bind(id.to_ulid_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn save(&self, message: &mut OutboxMessage) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = ?, processed_on_utc = ?, error = ?, processed_by_machine = ?,
                processing_started_on_utc = ?, is_deleted = ?, row_version = row_version + 1
            WHERE id = ? AND row_version = ?
            "#,
        )
        .bind(message.status().as_str())
        .bind(message.processed_on_utc().map(micros))
        .bind(message.error())
        .bind(message.processed_by_machine())
        .bind(message.processing_started_on_utc().map(micros))
        .bind(message.is_deleted())
        .bind(message.id().to_ulid_string())
        .bind(message.row_version() as i64)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM outbox_messages WHERE id = ?")
                .bind(message.id().to_ulid_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            return Err(match exists {
                Some(_) => StoreError::Conflict {
                    id: message.id(),
                    expected: message.row_version(),
                },
                None => StoreError::NotFound(message.id()),
            });
        }

        message.set_row_version(message.row_version() + 1);
        Ok(())
    }

    async fn delete_processed_before(
        &self,
        processed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE status = 'processed' AND processed_on_utc < ?
                ORDER BY processed_on_utc
                LIMIT ?
            )
            "#,
        )
        .bind(micros(processed_before))
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn query_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_messages \
             WHERE status = 'processing' AND is_deleted = 0 AND processing_started_on_utc < ? \
             ORDER BY processing_started_on_utc, id LIMIT ?"
        );
        self.fetch(&sql, (micros(started_before), limit as i64)).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM outbox_messages WHERE is_deleted = 0 GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let n: i64 = row.try_get("n").map_err(backend)?;
            match status.parse::<OutboxStatus>() {
                Ok(status) => counts.add(status, n as usize),
                Err(e) => tracing::warn!(error = %e, "ignoring rows with an unknown status"),
            }
        }
        Ok(counts)
    }
}
