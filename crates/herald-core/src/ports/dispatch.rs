//! Dispatch port - delivers decoded events to in-process handlers.
//!
//! The processor only depends on this trait; `app::EventDispatcher` is the
//! default implementation.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::domain::{BatchId, MessageId};
use crate::typed::AnyEvent;

/// Explicit tracing/correlation context handed down with each dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub node_id: String,
    pub batch_id: Option<BatchId>,
    pub message_id: Option<MessageId>,
    pub correlation_id: Option<String>,
}

impl DispatchContext {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            batch_id: None,
            message_id: None,
            correlation_id: None,
        }
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Error returned by an event handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// Turn a caught panic payload into an ordinary handler error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(format!("handler panicked: {detail}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One handler that failed during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub event_type: String,
    pub handler: String,
    pub error: HandlerError,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.handler, self.event_type, self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Every handler ran; these ones failed.
    #[error("{} handler(s) failed: {}", .0.len(), join_failures(.0))]
    HandlersFailed(Vec<HandlerFailure>),
}

impl DispatchError {
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            DispatchError::HandlersFailed(failures) => failures,
        }
    }
}

fn join_failures(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Delivers events, one after the other, to every handler registered for their type.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, events: &[&dyn AnyEvent], ctx: &DispatchContext) -> Result<(), DispatchError>;
}
