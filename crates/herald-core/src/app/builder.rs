//! OutboxBuilder - wires known event types, handlers and middleware at startup.
//!
//! Registration happens once; the resulting `EventPipeline` is immutable and
//! shared by the processor on every tick.

use std::collections::HashMap;
use std::sync::Arc;

use super::dispatcher::EventDispatcher;
use super::middleware::Middleware;
use crate::typed::{DomainEvent, DynHandler, EventHandler, EventRegistry, RegistryError, TypedHandler};

/// Builds an `EventPipeline`.
///
/// # Example
/// ```ignore
/// let pipeline = OutboxBuilder::new()
///     .handler::<OrderPlaced, _>(SendReceipt::new(mailer))?
///     .handler::<OrderPlaced, _>(ReserveStock::new(inventory))?
///     .event::<OrderCancelled>()?
///     .middleware(TracingMiddleware)
///     .expect_events(&[OrderPlaced::TYPE, OrderCancelled::TYPE])
///     .build()?;
/// ```
///
/// # Fail-fast
/// `build()` checks that every type passed to `expect_events` was registered,
/// so a forgotten registration surfaces at startup instead of as `Failed`
/// envelopes in production.
pub struct OutboxBuilder {
    registry: EventRegistry,
    handlers: HashMap<&'static str, Vec<Arc<dyn DynHandler>>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    expected_events: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing event types: {0:?}. These events were expected but not registered.")]
    MissingEventTypes(Vec<String>),
}

impl OutboxBuilder {
    pub fn new() -> Self {
        Self {
            registry: EventRegistry::new(),
            handlers: HashMap::new(),
            middlewares: Vec::new(),
            expected_events: None,
        }
    }

    /// Make `E` decodable without attaching a handler. Envelopes of such a
    /// type are marked `Processed` once decoded.
    pub fn event<E: DomainEvent>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<E>()?;
        Ok(self)
    }

    /// Register `E` and append `handler` to its handler list.
    /// Handlers of one event type run in registration order.
    pub fn handler<E: DomainEvent, H: EventHandler<E> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<E>()?;
        self.handlers
            .entry(E::TYPE)
            .or_default()
            .push(Arc::new(TypedHandler::<E, H>::new(handler)));
        Ok(self)
    }

    /// Append a middleware; the first one added is the outermost.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn expect_events(mut self, event_types: &[&str]) -> Self {
        self.expected_events = Some(event_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<EventPipeline, BuildError> {
        if let Some(expected) = &self.expected_events {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingEventTypes(missing));
            }
        }

        let handler_count: usize = self.handlers.values().map(Vec::len).sum();
        tracing::debug!(
            event_types = ?self.registry.registered_types(),
            handlers = handler_count,
            middlewares = self.middlewares.len(),
            "outbox pipeline built"
        );

        Ok(EventPipeline {
            registry: Arc::new(self.registry),
            dispatcher: Arc::new(EventDispatcher::new(self.handlers, self.middlewares)),
        })
    }
}

impl Default for OutboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Known event types plus the dispatcher delivering them.
#[derive(Debug, Clone)]
pub struct EventPipeline {
    pub registry: Arc<EventRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
}
