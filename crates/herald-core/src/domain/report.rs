//! Batch results returned by the processor, the retention job and the reaper.

use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;
use super::ids::{BatchId, MessageId};

/// Why an envelope was left untouched in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another node holds the per-message lock.
    LockBusy,
    /// The status was no longer `Pending` after the lock was taken.
    StatusChanged,
    /// The lock backend or the status re-check failed; retried next tick.
    Unavailable,
}

/// One failed envelope in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub message_id: MessageId,
    pub event_type: String,
    /// Truncated diagnostic text; the full text is persisted on the envelope.
    pub error: String,
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

/// Outcome of one `OutboxProcessor::process` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub processed_count: usize,
    pub failed_count: usize,
    pub skip_count: usize,
    /// Event types dispatched successfully, in processing order.
    pub succeeded_log: Vec<String>,
    pub failed_log: Vec<FailedEntry>,
    pub skipped_log: Vec<SkipReason>,
    /// Set when cancellation stopped the batch before its last envelope.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn empty(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            processed_count: 0,
            failed_count: 0,
            skip_count: 0,
            succeeded_log: Vec::new(),
            failed_log: Vec::new(),
            skipped_log: Vec::new(),
            cancelled: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processed_count == 0 && self.failed_count == 0 && self.skip_count == 0
    }

    pub fn total(&self) -> usize {
        self.processed_count + self.failed_count + self.skip_count
    }

    pub(crate) fn record_processed(&mut self, event_type: &str) {
        self.processed_count += 1;
        self.succeeded_log.push(event_type.to_string());
    }

    pub(crate) fn record_failed(&mut self, entry: FailedEntry) {
        self.failed_count += 1;
        self.failed_log.push(entry);
    }

    pub(crate) fn record_skipped(&mut self, reason: SkipReason) {
        self.skip_count += 1;
        self.skipped_log.push(reason);
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub deleted: u64,
    pub rounds: u32,
}

/// Outcome of one stale-processing sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    pub requeued: usize,
    pub skipped: usize,
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
