//! Errors - error types and their operational classification.

use crate::ports::dispatch::DispatchError;
use crate::ports::lock::LockError;
use crate::ports::outbox_store::StoreError;

/// Operational classification of a failure.
///
/// - Data: the payload or its type cannot be resolved; terminal for the envelope
/// - Handler: application handling logic failed; terminal until an operator resubmits
/// - Infrastructure: the store or lock backend failed
///
/// Lock contention is not listed: a busy lock is a skip, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Data,
    Handler,
    Infrastructure,
}

/// Envelope content could not be turned back into a domain event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event type '{0}' is not registered")]
    TypeNotFound(String),

    #[error("payload of '{event_type}' does not match its schema: {source}")]
    DeserializationFailed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error of the outbox subsystem.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to serialize event '{event_type}': {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl OutboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::Decode(_) | OutboxError::Encode { .. } => ErrorKind::Data,
            OutboxError::Dispatch(_) => ErrorKind::Handler,
            OutboxError::Store(_) | OutboxError::Lock(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let decode: OutboxError = DecodeError::TypeNotFound("x".into()).into();
        let store: OutboxError = StoreError::Backend("disk full".into()).into();
        let lock: OutboxError = LockError::Backend("redis down".into()).into();

        assert_eq!(decode.kind(), ErrorKind::Data);
        assert_eq!(store.kind(), ErrorKind::Infrastructure);
        assert_eq!(lock.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn transparent_errors_keep_their_message() {
        let err: OutboxError = DecodeError::TypeNotFound("sales.order.placed.v9".into()).into();
        assert_eq!(err.to_string(), "event type 'sales.order.placed.v9' is not registered");
    }
}
