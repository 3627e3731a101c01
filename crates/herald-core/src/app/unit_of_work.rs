//! UnitOfWork - collects the envelopes raised by one business transaction.
//!
//! Events are serialized when raised, so an unserializable event fails the
//! business operation instead of a later batch. Nothing is written until
//! `commit`; dropping the unit of work discards every raised envelope.

use std::sync::Arc;

use crate::domain::{MessageId, OutboxError, OutboxMessage};
use crate::ports::{Clock, IdGenerator, OutboxStore, StoreError};
use crate::typed::DomainEvent;

pub struct UnitOfWork {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    messages: Vec<OutboxMessage>,
}

impl UnitOfWork {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            clock,
            ids,
            messages: Vec::new(),
        }
    }

    /// Turn `event` into a `Pending` envelope that occurred now.
    pub fn raise<E: DomainEvent>(&mut self, event: &E) -> Result<MessageId, OutboxError> {
        let message = OutboxMessage::create(self.ids.generate_message_id(), event, self.clock.now())?;
        let id = message.id();
        self.messages.push(message);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[OutboxMessage] {
        &self.messages
    }

    /// Hand the envelopes over to a caller-owned transaction
    /// (see `SqliteOutboxStore::append_in`).
    pub fn into_messages(self) -> Vec<OutboxMessage> {
        self.messages
    }

    /// Append every raised envelope atomically. Returns how many were written.
    pub async fn commit(self, store: &dyn OutboxStore) -> Result<usize, StoreError> {
        let count = self.messages.len();
        if count == 0 {
            return Ok(0);
        }
        store.append(self.messages).await?;
        tracing::debug!(count, "outbox envelopes committed");
        Ok(count)
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("messages", &self.messages.len())
            .finish()
    }
}
