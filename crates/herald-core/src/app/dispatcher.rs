//! EventDispatcher - delivers events to every handler registered for their type.
//!
//! # Flow (per event, events in order)
//! 1. Resolve the handler list by the event's runtime type (cached after first use)
//! 2. Run each handler through the middleware chain, in registration order
//! 3. A failing or panicking handler is logged and recorded; the remaining
//!    handlers still run
//! 4. After all events, report every failure at once

use std::any::TypeId;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::FutureExt;

use super::middleware::{Middleware, Next};
use crate::ports::{Dispatch, DispatchContext, DispatchError, HandlerError, HandlerFailure};
use crate::typed::{AnyEvent, DynHandler};

type HandlerList = Arc<[Arc<dyn DynHandler>]>;

/// Explicit dispatch table built at startup (see `OutboxBuilder`).
pub struct EventDispatcher {
    table: HashMap<&'static str, Vec<Arc<dyn DynHandler>>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    resolved: RwLock<HashMap<TypeId, HandlerList>>,
}

impl EventDispatcher {
    pub fn new(
        table: HashMap<&'static str, Vec<Arc<dyn DynHandler>>>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            table,
            middlewares,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.table.get(event_type).map_or(0, Vec::len)
    }

    /// Number of concrete event types resolved so far.
    pub fn cached_types(&self) -> usize {
        match self.resolved.read() {
            Ok(resolved) => resolved.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn resolve(&self, event: &dyn AnyEvent) -> HandlerList {
        let type_id = event.as_any().type_id();
        if let Ok(resolved) = self.resolved.read()
            && let Some(handlers) = resolved.get(&type_id)
        {
            return handlers.clone();
        }

        let handlers: HandlerList = self
            .table
            .get(event.event_type())
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_else(|| Arc::from(Vec::new()));

        // A poisoned cache only costs a repeated lookup.
        if let Ok(mut resolved) = self.resolved.write() {
            resolved.insert(type_id, handlers.clone());
        }
        handlers
    }

    async fn dispatch_one(
        &self,
        event: &dyn AnyEvent,
        ctx: &DispatchContext,
        failures: &mut Vec<HandlerFailure>,
    ) {
        let handlers = self.resolve(event);
        if handlers.is_empty() {
            tracing::debug!(event_type = event.event_type(), "no handlers registered");
            return;
        }

        for handler in handlers.iter() {
            let result = AssertUnwindSafe(Next::new(&self.middlewares, handler.as_ref()).run(event, ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));
            if let Err(error) = result {
                tracing::warn!(
                    event_type = event.event_type(),
                    handler = handler.handler_name(),
                    error = %error,
                    "event handler failed"
                );
                failures.push(HandlerFailure {
                    event_type: event.event_type().to_string(),
                    handler: handler.handler_name().to_string(),
                    error,
                });
            }
        }
    }
}

#[async_trait]
impl Dispatch for EventDispatcher {
    async fn dispatch(&self, events: &[&dyn AnyEvent], ctx: &DispatchContext) -> Result<(), DispatchError> {
        let mut failures = Vec::new();
        for event in events {
            self.dispatch_one(*event, ctx, &mut failures).await;
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::HandlersFailed(failures))
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.table.iter().map(|(k, v)| (*k, v.len())).collect();
        types.sort();
        f.debug_struct("EventDispatcher")
            .field("handlers", &types)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
