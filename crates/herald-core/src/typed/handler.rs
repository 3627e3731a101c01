//! Handler trait - application code reacting to one event type.
//!
//! Two layers, same as the registry:
//! - **typed**: `EventHandler<E>` sees the concrete event
//! - **dyn**: `DynHandler` is object safe and stored in the dispatch table
//!
//! `TypedHandler<E, H>` erases the type by downcasting `&dyn AnyEvent` back to `E`.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::event::{AnyEvent, DomainEvent};
use crate::ports::{DispatchContext, HandlerError};

/// Handles events of type `E`.
///
/// # Example
/// ```ignore
/// struct SendReceipt;
///
/// #[async_trait]
/// impl EventHandler<OrderPlaced> for SendReceipt {
///     async fn handle(&self, event: &OrderPlaced, ctx: &DispatchContext) -> Result<(), HandlerError> {
///         mailer.send_receipt(event.order_id).await.map_err(HandlerError::new)
///     }
/// }
/// ```
///
/// Delivery is at least once: a handler may see the same event again after a
/// crash or a manual resubmission, so it must be idempotent.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync {
    async fn handle(&self, event: &E, ctx: &DispatchContext) -> Result<(), HandlerError>;
}

/// Object-safe handler.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, event: &dyn AnyEvent, ctx: &DispatchContext) -> Result<(), HandlerError>;

    fn event_type(&self) -> &'static str;

    /// Name used in logs and failure reports.
    fn handler_name(&self) -> &'static str;
}

pub struct TypedHandler<E: DomainEvent, H: EventHandler<E>> {
    handler: H,
    _marker: PhantomData<fn(E)>,
}

impl<E: DomainEvent, H: EventHandler<E>> TypedHandler<E, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E: DomainEvent, H: EventHandler<E>> DynHandler for TypedHandler<E, H> {
    async fn handle_dyn(&self, event: &dyn AnyEvent, ctx: &DispatchContext) -> Result<(), HandlerError> {
        let Some(event) = event.downcast_ref::<E>() else {
            return Err(HandlerError::new(format!(
                "handler for {} received {}",
                E::TYPE,
                event.event_type()
            )));
        };
        self.handler.handle(event, ctx).await
    }

    fn event_type(&self) -> &'static str {
        E::TYPE
    }

    fn handler_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<H>())
    }
}

/// `my_app::handlers::SendReceipt` -> `SendReceipt` (generic arguments kept).
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
