//! Outbox message status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an outbox message.
///
/// State transitions:
/// - Pending -> Processing -> Processed
/// - Pending -> Processing -> Failed
/// - Pending -> Failed (payload could not be decoded)
/// - Processing -> Pending (stale reaper)
/// - Failed -> Pending (operator resubmits after fixing the cause)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting to be dispatched.
    #[default]
    Pending,

    /// Claimed by a node; dispatch in progress.
    Processing,

    /// Dispatched successfully.
    Processed,

    /// Dispatch or decoding failed; needs an operator.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }

    /// Terminal for the processor (only an operator or retention touches it again).
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Processed | OutboxStatus::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outbox status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OutboxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Number of messages per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub processed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: OutboxStatus, n: usize) {
        match status {
            OutboxStatus::Pending => self.pending += n,
            OutboxStatus::Processing => self.processing += n,
            OutboxStatus::Processed => self.processed += n,
            OutboxStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.processed + self.failed
    }
}
