//! Middleware - cross-cutting concerns composed around each handler call.
//!
//! The chain is an ordered list: the first middleware registered is the
//! outermost. Each one decides whether and how to call `next.run(..)`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;

use crate::ports::{DispatchContext, HandlerError};
use crate::typed::{AnyEvent, DynHandler};

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        event: &dyn AnyEvent,
        ctx: &DispatchContext,
        next: Next<'_>,
    ) -> Result<(), HandlerError>;
}

/// The rest of the chain, ending in the handler itself.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a dyn DynHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middlewares: &'a [Arc<dyn Middleware>], handler: &'a dyn DynHandler) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler.handler_name()
    }

    pub async fn run(self, event: &dyn AnyEvent, ctx: &DispatchContext) -> Result<(), HandlerError> {
        match self.middlewares.split_first() {
            Some((first, rest)) => {
                first
                    .handle(event, ctx, Next::new(rest, self.handler))
                    .await
            }
            None => self.handler.handle_dyn(event, ctx).await,
        }
    }
}

/// Runs each handler inside a span and logs its outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        event: &dyn AnyEvent,
        ctx: &DispatchContext,
        next: Next<'_>,
    ) -> Result<(), HandlerError> {
        let handler = next.handler_name();
        let batch_id = ctx.batch_id.map(|id| id.to_string()).unwrap_or_default();
        let message_id = ctx.message_id.map(|id| id.to_string()).unwrap_or_default();
        let span = tracing::info_span!(
            "handle_event",
            event_type = event.event_type(),
            handler,
            node_id = %ctx.node_id,
            batch_id = %batch_id,
            message_id = %message_id,
            correlation_id = ctx.correlation_id.as_deref().unwrap_or(""),
        );

        let started = Instant::now();
        let result = next.run(event, ctx).instrument(span.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        span.in_scope(|| match &result {
            Ok(()) => tracing::debug!(elapsed_ms, "handler completed"),
            Err(e) => tracing::warn!(elapsed_ms, error = %e, "handler failed"),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OrderPlaced, RecordingHandler};
    use crate::typed::TypedHandler;
    use std::sync::Mutex;

    struct Tag {
        name: &'static str,
        trail: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(
            &self,
            event: &dyn AnyEvent,
            ctx: &DispatchContext,
            next: Next<'_>,
        ) -> Result<(), HandlerError> {
            self.trail.lock().unwrap().push(format!("{}:before", self.name));
            let result = next.run(event, ctx).await;
            self.trail.lock().unwrap().push(format!("{}:after", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(
            &self,
            _event: &dyn AnyEvent,
            _ctx: &DispatchContext,
            _next: Next<'_>,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::new("rejected by policy"))
        }
    }

    #[tokio::test]
    async fn chain_runs_outermost_first() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Tag { name: "outer", trail: trail.clone() }),
            Arc::new(Tag { name: "inner", trail: trail.clone() }),
            Arc::new(TracingMiddleware),
        ];
        let recorder = RecordingHandler::new("h");
        let handler = TypedHandler::<OrderPlaced, _>::new(recorder.clone());
        let ctx = DispatchContext::new("node-a");

        Next::new(&chain, &handler)
            .run(&OrderPlaced { order_id: 1 }, &ctx)
            .await
            .unwrap();

        assert_eq!(
            *trail.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
        assert_eq!(recorder.seen().len(), 1);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ShortCircuit)];
        let recorder = RecordingHandler::new("h");
        let handler = TypedHandler::<OrderPlaced, _>::new(recorder.clone());
        let ctx = DispatchContext::new("node-a");

        let err = Next::new(&chain, &handler)
            .run(&OrderPlaced { order_id: 1 }, &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.message(), "rejected by policy");
        assert!(recorder.seen().is_empty());
    }
}
