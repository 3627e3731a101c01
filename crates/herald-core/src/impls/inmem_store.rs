//! In-memory outbox store.
//!
//! Behaves like the SQL store (row versions, all-or-nothing append, oldest
//! first ordering) so the application layer can be tested without a database.
//! Failure injection hooks let tests exercise the infrastructure error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{MessageId, OutboxMessage, OutboxStatus, StatusCounts};
use crate::ports::{OutboxStore, StoreError};

#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<HashMap<MessageId, OutboxMessage>>,
    save_calls: AtomicUsize,
    failing_saves: AtomicUsize,
    failing_queries: AtomicUsize,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far, failed ones included.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` saves fail with a backend error.
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` pending queries fail with a backend error.
    pub fn fail_next_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// Every stored envelope, oldest first.
    pub async fn snapshot(&self) -> Vec<OutboxMessage> {
        let rows = self.rows.lock().await;
        let mut all: Vec<OutboxMessage> = rows.values().cloned().collect();
        all.sort_by_key(|m| (m.occurred_on_utc(), m.id()));
        all
    }

    fn take_injected(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let mut seen = std::collections::HashSet::new();
        for message in &messages {
            if rows.contains_key(&message.id()) || !seen.insert(message.id()) {
                return Err(StoreError::Duplicate(message.id()));
            }
        }
        for message in messages {
            rows.insert(message.id(), message);
        }
        Ok(())
    }

    async fn query_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxMessage>, StoreError> {
        if Self::take_injected(&self.failing_queries) {
            return Err(StoreError::Backend("injected query failure".into()));
        }
        let rows = self.rows.lock().await;
        let mut pending: Vec<OutboxMessage> = rows
            .values()
            .filter(|m| {
                m.status() == OutboxStatus::Pending
                    && m.processed_on_utc().is_none()
                    && !m.is_deleted()
                    && m.occurred_on_utc() <= now
            })
            .cloned()
            .collect();
        pending.sort_by_key(|m| (m.occurred_on_utc(), m.id()));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn query_status(&self, id: MessageId) -> Result<Option<OutboxStatus>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&id).filter(|m| !m.is_deleted()).map(|m| m.status()))
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&id).cloned())
    }

    async fn save(&self, message: &mut OutboxMessage) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_injected(&self.failing_saves) {
            return Err(StoreError::Backend("injected save failure".into()));
        }

        let mut rows = self.rows.lock().await;
        let stored = rows
            .get_mut(&message.id())
            .ok_or(StoreError::NotFound(message.id()))?;
        if stored.row_version() != message.row_version() {
            return Err(StoreError::Conflict {
                id: message.id(),
                expected: message.row_version(),
            });
        }

        message.set_row_version(message.row_version() + 1);
        *stored = message.clone();
        Ok(())
    }

    async fn delete_processed_before(
        &self,
        processed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut expired: Vec<(DateTime<Utc>, MessageId)> = rows
            .values()
            .filter(|m| m.status() == OutboxStatus::Processed)
            .filter_map(|m| m.processed_on_utc().map(|at| (at, m.id())))
            .filter(|(at, _)| *at < processed_before)
            .collect();
        expired.sort();
        expired.truncate(limit);
        for (_, id) in &expired {
            rows.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn query_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = self.rows.lock().await;
        let mut stale: Vec<OutboxMessage> = rows
            .values()
            .filter(|m| m.status() == OutboxStatus::Processing && !m.is_deleted())
            .filter(|m| m.processing_started_on_utc().is_some_and(|t| t < started_before))
            .cloned()
            .collect();
        stale.sort_by_key(|m| (m.processing_started_on_utc(), m.id()));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = self.rows.lock().await;
        let mut counts = StatusCounts::default();
        for message in rows.values().filter(|m| !m.is_deleted()) {
            counts.add(message.status(), 1);
        }
        Ok(counts)
    }
}
