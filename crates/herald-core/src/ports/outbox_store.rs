//! OutboxStore port - outbox の永続化ゲートウェイ
//!
//! ノード間で共有される可変リソースは store だけです。
//! 書き込みは envelope 1件ごとのトランザクションなので、バッチ途中までの進捗も残ります。
//!
//! # 実装
//! - `impls::InMemoryOutboxStore` (development and tests)
//! - `herald-sqlx`: `SqliteOutboxStore`

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{MessageId, OutboxMessage, OutboxStatus, StatusCounts};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("outbox message {0} not found")]
    NotFound(MessageId),

    /// The stored row version differs from the caller's copy.
    #[error("outbox message {id} was modified concurrently (expected row version {expected})")]
    Conflict { id: MessageId, expected: u64 },

    #[error("outbox message {0} already exists")]
    Duplicate(MessageId),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert new envelopes, all or nothing.
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), StoreError>;

    /// Up to `limit` envelopes with `status == Pending`, no `processed_on_utc`,
    /// not soft-deleted and `occurred_on_utc <= now`, oldest first.
    async fn query_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Current status of one envelope, `None` if it no longer exists.
    async fn query_status(&self, id: MessageId) -> Result<Option<OutboxStatus>, StoreError>;

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, StoreError>;

    /// Persist the mutable fields of `message`.
    ///
    /// Fails with `Conflict` when the stored row version differs from
    /// `message.row_version()`; on success both are incremented.
    async fn save(&self, message: &mut OutboxMessage) -> Result<(), StoreError>;

    /// Hard-delete up to `limit` `Processed` envelopes processed before `processed_before`.
    /// Returns the number deleted; callers loop until it returns 0.
    async fn delete_processed_before(
        &self,
        processed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError>;

    /// Up to `limit` `Processing` envelopes whose processing started before `started_before`.
    async fn query_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}
