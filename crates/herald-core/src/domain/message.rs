//! OutboxMessage - the persisted envelope of one domain event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{DecodeError, OutboxError};
use super::ids::MessageId;
use super::status::OutboxStatus;
use crate::typed::{AnyEvent, DomainEvent, EventRegistry, PayloadCodec};

/// One domain event that must eventually be delivered.
///
/// Identity, type, content and occurrence time never change after creation.
/// Only the status fields move, and only through the transition methods below;
/// persisting a transition is the caller's job.
///
/// Invariant: `processed_on_utc.is_some()` iff `status == Processed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    id: MessageId,
    event_type: String,
    content: String,
    occurred_on_utc: DateTime<Utc>,

    status: OutboxStatus,
    processed_on_utc: Option<DateTime<Utc>>,
    error: Option<String>,
    processed_by_machine: Option<String>,

    /// Set while `Processing`; lets the reaper find envelopes orphaned by a crash.
    processing_started_on_utc: Option<DateTime<Utc>>,

    /// Soft-delete flag of the shared entity contract.
    is_deleted: bool,

    /// Optimistic concurrency token, bumped by the store on every save.
    row_version: u64,
}

impl OutboxMessage {
    /// Wrap `event` in a new `Pending` envelope.
    pub fn create<E: DomainEvent>(
        id: MessageId,
        event: &E,
        occurred_on_utc: DateTime<Utc>,
    ) -> Result<Self, OutboxError> {
        let content = PayloadCodec::encode(event).map_err(|source| OutboxError::Encode {
            event_type: E::TYPE,
            source,
        })?;
        Ok(Self::from_raw(id, E::TYPE, content, occurred_on_utc))
    }

    /// Build a `Pending` envelope from already-serialized content.
    pub fn from_raw(
        id: MessageId,
        event_type: impl Into<String>,
        content: impl Into<String>,
        occurred_on_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            content: content.into(),
            occurred_on_utc,
            status: OutboxStatus::Pending,
            processed_on_utc: None,
            error: None,
            processed_by_machine: None,
            processing_started_on_utc: None,
            is_deleted: false,
            row_version: 0,
        }
    }

    /// Resolve the stored type and decode the payload.
    pub fn to_domain_event(&self, registry: &EventRegistry) -> Result<Box<dyn AnyEvent>, DecodeError> {
        registry.decode(&self.event_type, &self.content)
    }

    // Getters
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn occurred_on_utc(&self) -> DateTime<Utc> {
        self.occurred_on_utc
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn processed_on_utc(&self) -> Option<DateTime<Utc>> {
        self.processed_on_utc
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn processed_by_machine(&self) -> Option<&str> {
        self.processed_by_machine.as_deref()
    }

    pub fn processing_started_on_utc(&self) -> Option<DateTime<Utc>> {
        self.processing_started_on_utc
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn row_version(&self) -> u64 {
        self.row_version
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    // Transitions
    pub fn mark_processing(&mut self, node_id: impl Into<String>, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processing;
        self.processed_by_machine = Some(node_id.into());
        self.processing_started_on_utc = Some(now);
    }

    pub fn mark_processed(&mut self, processed_on_utc: DateTime<Utc>, node_id: impl Into<String>) {
        self.status = OutboxStatus::Processed;
        self.processed_on_utc = Some(processed_on_utc);
        self.processed_by_machine = Some(node_id.into());
        self.processing_started_on_utc = None;
    }

    /// Record a diagnostic without changing the status.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn mark_failed(&mut self, node_id: impl Into<String>, message: impl Into<String>) {
        self.status = OutboxStatus::Failed;
        self.processed_on_utc = None;
        self.processed_by_machine = Some(node_id.into());
        self.processing_started_on_utc = None;
        self.set_error(message);
    }

    /// Put the envelope back in line: an orphaned `Processing` envelope from
    /// the reaper, or a `Failed` one resubmitted by an operator. `note` is
    /// kept as the error text so the history stays visible.
    pub fn requeue(&mut self, note: impl Into<String>) {
        self.status = OutboxStatus::Pending;
        self.processed_on_utc = None;
        self.processing_started_on_utc = None;
        self.set_error(note);
    }

    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
    }

    /// Used by stores after a successful save, and when rehydrating rows.
    pub fn set_row_version(&mut self, row_version: u64) {
        self.row_version = row_version;
    }

    /// Rebuild an envelope from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: MessageId,
        event_type: String,
        content: String,
        occurred_on_utc: DateTime<Utc>,
        status: OutboxStatus,
        processed_on_utc: Option<DateTime<Utc>>,
        error: Option<String>,
        processed_by_machine: Option<String>,
        processing_started_on_utc: Option<DateTime<Utc>>,
        is_deleted: bool,
        row_version: u64,
    ) -> Self {
        Self {
            id,
            event_type,
            content,
            occurred_on_utc,
            status,
            processed_on_utc,
            error,
            processed_by_machine,
            processing_started_on_utc,
            is_deleted,
            row_version,
        }
    }
}
