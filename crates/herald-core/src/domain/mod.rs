//! Domain model: ids, status, the outbox envelope, errors and batch reports.

pub mod errors;
pub mod ids;
pub mod message;
pub mod report;
pub mod status;

pub use errors::{DecodeError, ErrorKind, OutboxError};
pub use ids::{BatchId, Id, IdMarker, MessageId};
pub use message::OutboxMessage;
pub use report::{BatchReport, FailedEntry, ReapReport, RetentionReport, SkipReason};
pub use status::{OutboxStatus, StatusCounts};
