//! OutboxProcessor - claims, dispatches and finalizes one batch of envelopes.
//!
//! # Flow (per envelope, oldest first)
//! 1. Take `outbox:message:{id}` with the configured timeout (zero by default);
//!    busy means skip, never wait on a peer
//! 2. Re-read the status; anything but `Pending` means another node got there first
//! 3. Decode; an unknown type or a bad payload goes straight to `Failed`
//! 4. Mark `Processing` and save, so a crash mid-dispatch is visible
//! 5. Dispatch, then mark `Processed` or `Failed` and save; a panic during
//!    dispatch counts as a handler failure
//! 6. Release the lock
//!
//! Every envelope is handled on its own: no per-envelope failure aborts the
//! batch. Cancellation is checked between envelopes only.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::builder::EventPipeline;
use super::config::ProcessorOptions;
use crate::domain::{
    BatchId, BatchReport, ErrorKind, FailedEntry, OutboxError, OutboxMessage, OutboxStatus, SkipReason,
    report::snippet,
};
use crate::ports::{
    Clock, Dispatch, DispatchContext, HandlerError, IdGenerator, LockProvider, OutboxStore, StoreError,
    SystemClock, UlidGenerator, message_lock_name,
};
use crate::typed::EventRegistry;

/// Result of handling one envelope.
#[derive(Debug)]
enum Outcome {
    Processed,
    Failed(FailedEntry),
    Skipped(SkipReason),
}

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    locks: Arc<dyn LockProvider>,
    registry: Arc<EventRegistry>,
    dispatcher: Arc<dyn Dispatch>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    options: ProcessorOptions,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        locks: Arc<dyn LockProvider>,
        registry: Arc<EventRegistry>,
        dispatcher: Arc<dyn Dispatch>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            store,
            locks,
            registry,
            dispatcher,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            options,
        }
    }

    pub fn from_pipeline(
        store: Arc<dyn OutboxStore>,
        locks: Arc<dyn LockProvider>,
        pipeline: &EventPipeline,
        options: ProcessorOptions,
    ) -> Self {
        Self::new(
            store,
            locks,
            pipeline.registry.clone(),
            pipeline.dispatcher.clone(),
            options,
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Process up to `batch_size` pending envelopes.
    ///
    /// Only a failure to load the batch is returned as `Err`; everything that
    /// goes wrong with a single envelope ends up in the report.
    pub async fn process(&self, batch_size: usize, cancel: &CancellationToken) -> Result<BatchReport, OutboxError> {
        let batch_id = self.ids.generate_batch_id();
        let span = tracing::info_span!("outbox_batch", batch_id = %batch_id, node_id = %self.options.node_id);
        self.process_batch(batch_id, batch_size, cancel).instrument(span).await
    }

    async fn process_batch(
        &self,
        batch_id: BatchId,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, OutboxError> {
        let mut report = BatchReport::empty(batch_id);
        let pending = self.store.query_pending(batch_size, self.clock.now()).await?;
        if pending.is_empty() {
            tracing::debug!("no pending outbox messages");
            return Ok(report);
        }

        let claimed = pending.len();
        for message in pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                tracing::info!(remaining = claimed - report.total(), "batch cancelled between envelopes");
                break;
            }

            let message_id = message.id();
            let event_type = message.event_type().to_string();
            match self.process_message(message, batch_id, cancel).await {
                Outcome::Processed => report.record_processed(&event_type),
                Outcome::Failed(entry) => {
                    tracing::warn!(
                        message_id = %message_id,
                        event_type = %event_type,
                        error = %entry.error,
                        "outbox message failed"
                    );
                    report.record_failed(entry);
                }
                Outcome::Skipped(reason) => {
                    tracing::debug!(message_id = %message_id, ?reason, "outbox message skipped");
                    report.record_skipped(reason);
                }
            }
        }

        tracing::info!(
            processed = report.processed_count,
            failed = report.failed_count,
            skipped = report.skip_count,
            cancelled = report.cancelled,
            "outbox batch finished"
        );
        Ok(report)
    }

    async fn process_message(&self, message: OutboxMessage, batch_id: BatchId, cancel: &CancellationToken) -> Outcome {
        let lock = self.locks.create_lock(&message_lock_name(message.id()));
        let mut handle = match lock.try_acquire(self.options.lock_timeout, cancel).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return Outcome::Skipped(SkipReason::LockBusy),
            Err(e) => {
                tracing::warn!(lock = lock.name(), error = %e, "lock backend unavailable");
                return Outcome::Skipped(SkipReason::Unavailable);
            }
        };

        let outcome = self.process_locked(message, batch_id).await;

        if let Err(e) = handle.release().await {
            tracing::warn!(lock = handle.name(), error = %e, "lock release failed");
        }
        outcome
    }

    async fn process_locked(&self, mut message: OutboxMessage, batch_id: BatchId) -> Outcome {
        match self.store.query_status(message.id()).await {
            Ok(Some(OutboxStatus::Pending)) => {}
            Ok(_) => return Outcome::Skipped(SkipReason::StatusChanged),
            Err(e) => {
                tracing::warn!(message_id = %message.id(), error = %e, "status re-check failed");
                return Outcome::Skipped(SkipReason::Unavailable);
            }
        }

        let node_id = self.options.node_id.clone();

        let event = match message.to_domain_event(&self.registry) {
            Ok(event) => event,
            Err(e) => {
                let error = OutboxError::from(e);
                return self.finish_failed(message, error.to_string(), error.kind()).await;
            }
        };

        message.mark_processing(node_id.as_str(), self.clock.now());
        match self.store.save(&mut message).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => return Outcome::Skipped(SkipReason::StatusChanged),
            Err(e) => {
                return self
                    .finish_failed(message, e.to_string(), ErrorKind::Infrastructure)
                    .await;
            }
        }

        let ctx = DispatchContext::new(node_id.as_str())
            .with_batch(batch_id)
            .with_message(message.id());
        let dispatched = AssertUnwindSafe(self.dispatcher.dispatch(&[&*event], &ctx))
            .catch_unwind()
            .await;
        let failure = match dispatched {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(HandlerError::from_panic(payload).to_string()),
        };
        if let Some(error) = failure {
            return self.finish_failed(message, error, ErrorKind::Handler).await;
        }

        message.mark_processed(self.clock.now(), node_id.as_str());
        match self.store.save(&mut message).await {
            Ok(()) => Outcome::Processed,
            Err(StoreError::Conflict { .. }) => Outcome::Skipped(SkipReason::StatusChanged),
            Err(e) => {
                self.finish_failed(message, e.to_string(), ErrorKind::Infrastructure)
                    .await
            }
        }
    }

    /// Persist `Failed` with the full diagnostic; the report keeps a snippet.
    async fn finish_failed(&self, mut message: OutboxMessage, error: String, kind: ErrorKind) -> Outcome {
        message.mark_failed(self.options.node_id.as_str(), error.as_str());
        match self.store.save(&mut message).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => return Outcome::Skipped(SkipReason::StatusChanged),
            Err(e) => {
                tracing::error!(
                    message_id = %message.id(),
                    error = %e,
                    original_error = %error,
                    "could not persist failed status; envelope may stay in processing until reaped"
                );
            }
        }

        Outcome::Failed(FailedEntry {
            message_id: message.id(),
            event_type: message.event_type().to_string(),
            error: snippet(&error, self.options.error_snippet_chars),
            kind: Some(kind),
        })
    }
}

impl std::fmt::Debug for OutboxProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxProcessor")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::OutboxBuilder;
    use crate::impls::{InMemoryAdvisoryLocks, InMemoryOutboxStore};
    use crate::ports::FixedClock;
    use crate::testing::{
        GatedDispatch, OrderPlaced, OrderShipped, PanickingHandler, RecordingHandler, ScriptedDispatch,
        StaleSnapshotStore, at, message_id, node_options, placed_at,
    };
    use crate::typed::DomainEvent;
    use chrono::Duration;

    struct Harness {
        store: Arc<InMemoryOutboxStore>,
        locks: InMemoryAdvisoryLocks,
        registry: Arc<EventRegistry>,
        clock: Arc<FixedClock>,
    }

    impl Harness {
        fn new() -> Self {
            let mut registry = EventRegistry::new();
            registry.register::<OrderPlaced>().unwrap();
            registry.register::<OrderShipped>().unwrap();
            Self {
                store: Arc::new(InMemoryOutboxStore::new()),
                locks: InMemoryAdvisoryLocks::new(),
                registry: Arc::new(registry),
                clock: Arc::new(FixedClock::new(at(60))),
            }
        }

        fn processor(&self, node: &str, dispatcher: Arc<dyn Dispatch>) -> OutboxProcessor {
            self.processor_over(self.store.clone(), node, dispatcher)
        }

        fn processor_over(
            &self,
            store: Arc<dyn OutboxStore>,
            node: &str,
            dispatcher: Arc<dyn Dispatch>,
        ) -> OutboxProcessor {
            OutboxProcessor::new(
                store,
                Arc::new(self.locks.session()),
                self.registry.clone(),
                dispatcher,
                node_options(node),
            )
            .with_clock(self.clock.clone())
        }

        async fn seed(&self, messages: Vec<OutboxMessage>) {
            self.store.append(messages).await.unwrap();
        }
    }

    #[tokio::test]
    async fn processes_oldest_first_with_two_saves_per_envelope() {
        let h = Harness::new();
        // now = minute 60; occurred at now-10m, now-8m, now-5m, inserted out of order
        h.seed(vec![placed_at(2, 55), placed_at(3, 50), placed_at(1, 52)]).await;
        let dispatch = Arc::new(ScriptedDispatch::new());

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed_count, 3);
        assert_eq!(report.failed_count, 0);
        assert_eq!(report.skip_count, 0);
        assert_eq!(dispatch.calls(), vec![3, 1, 2]);
        assert_eq!(h.store.save_calls(), 6);
        assert_eq!(report.succeeded_log, vec![OrderPlaced::TYPE; 3]);

        for message in h.store.snapshot().await {
            assert_eq!(message.status(), OutboxStatus::Processed);
            assert_eq!(message.processed_on_utc(), Some(at(60)));
            assert_eq!(message.processed_by_machine(), Some("node-a"));
        }
    }

    #[tokio::test]
    async fn empty_pending_set_returns_zero_report() {
        let h = Harness::new();
        let report = h
            .processor("node-a", Arc::new(ScriptedDispatch::new()))
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(h.store.save_calls(), 0);
    }

    #[tokio::test]
    async fn future_envelopes_are_not_claimed() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 59), placed_at(2, 61)]).await;
        let dispatch = Arc::new(ScriptedDispatch::new());

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed_count, 1);
        assert_eq!(dispatch.calls(), vec![1]);
    }

    #[tokio::test]
    async fn peer_holding_the_lock_causes_a_skip() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50)]).await;
        // node B queried before node A marked the envelope processing
        let b_view = Arc::new(StaleSnapshotStore::capture(h.store.clone()).await);
        let gate = Arc::new(GatedDispatch::new());

        let node_a = h.processor("node-a", gate.clone());
        let running_a = tokio::spawn(async move { node_a.process(10, &CancellationToken::new()).await });
        gate.wait_entered().await;

        let dispatch_b = Arc::new(ScriptedDispatch::new());
        let report_b = h
            .processor_over(b_view, "node-b", dispatch_b.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        gate.open();
        let report_a = running_a.await.unwrap().unwrap();

        assert_eq!(report_b.skip_count, 1);
        assert_eq!(report_b.skipped_log, vec![SkipReason::LockBusy]);
        assert_eq!(report_b.processed_count, 0);
        assert!(dispatch_b.calls().is_empty());
        assert_eq!(report_a.processed_count, 1);
        assert_eq!(gate.dispatched(), 1);
    }

    #[tokio::test]
    async fn lock_held_by_another_session_skips_without_touching_the_envelope() {
        let h = Harness::new();
        let message = placed_at(1, 50);
        let id = message.id();
        h.seed(vec![message]).await;
        let other = h.locks.session();
        let mut held = other
            .create_lock(&message_lock_name(id))
            .try_acquire(std::time::Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let dispatch = Arc::new(ScriptedDispatch::new());
        let report = h
            .processor("node-b", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();
        held.release().await.unwrap();

        assert_eq!(report.skipped_log, vec![SkipReason::LockBusy]);
        assert!(dispatch.calls().is_empty());
        assert_eq!(h.store.save_calls(), 0);
        assert_eq!(h.store.query_status(id).await.unwrap(), Some(OutboxStatus::Pending));
    }

    #[tokio::test]
    async fn stale_batch_is_skipped_after_the_status_recheck() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50), placed_at(2, 51)]).await;
        let stale = Arc::new(StaleSnapshotStore::capture(h.store.clone()).await);

        let first = h
            .processor("node-a", Arc::new(ScriptedDispatch::new()))
            .process(10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.processed_count, 2);

        let late_dispatch = Arc::new(ScriptedDispatch::new());
        let late = h
            .processor_over(stale, "node-b", late_dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(late.skip_count, 2);
        assert_eq!(late.skipped_log, vec![SkipReason::StatusChanged; 2]);
        assert!(late_dispatch.calls().is_empty());
    }

    #[tokio::test]
    async fn handler_failure_marks_only_that_envelope_failed() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50), placed_at(2, 51), placed_at(3, 52)]).await;
        let dispatch = Arc::new(ScriptedDispatch::failing_on(2, "inventory service unavailable"));

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed_count, 2);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.failed_log[0].kind, Some(ErrorKind::Handler));

        let snapshot = h.store.snapshot().await;
        let failed: Vec<_> = snapshot.iter().filter(|m| m.status() == OutboxStatus::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].content(), r#"{"order_id":2}"#);
        assert!(failed[0].error().unwrap().contains("inventory service unavailable"));
        assert_eq!(failed[0].processed_on_utc(), None);
        assert_eq!(
            snapshot.iter().filter(|m| m.status() == OutboxStatus::Processed).count(),
            2
        );
    }

    #[tokio::test]
    async fn panicking_handler_fails_its_envelope_and_the_batch_continues() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50), placed_at(2, 51)]).await;
        let recorder = RecordingHandler::new("audit");
        let pipeline = OutboxBuilder::new()
            .handler::<OrderPlaced, _>(PanickingHandler::on_order(1))
            .unwrap()
            .handler::<OrderPlaced, _>(recorder.clone())
            .unwrap()
            .build()
            .unwrap();
        let processor = OutboxProcessor::from_pipeline(
            h.store.clone(),
            Arc::new(h.locks.session()),
            &pipeline,
            node_options("node-a"),
        )
        .with_clock(h.clock.clone());

        let report = processor.process(10, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed_count, 1);
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.failed_log[0].kind, Some(ErrorKind::Handler));
        assert!(report.failed_log[0].error.contains("handler panicked: poison order 1"));
        assert_eq!(recorder.seen().len(), 2);

        let counts = h.store.count_by_status().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.processed, 1);
        assert_eq!(counts.processing, 0);

        // the lock was released, so a later batch finds nothing left to do
        let again = processor.process(10, &CancellationToken::new()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn panicking_dispatcher_is_contained_per_envelope() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50), placed_at(2, 51)]).await;
        let dispatch = Arc::new(ScriptedDispatch::panicking_on(1));

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed_count, 1);
        assert_eq!(report.processed_count, 1);
        assert!(report.failed_log[0].error.contains("dispatcher crashed on call 1"));
        assert_eq!(dispatch.calls(), vec![1, 2]);
        let stored = h.store.get(report.failed_log[0].message_id).await.unwrap().unwrap();
        assert_eq!(stored.status(), OutboxStatus::Failed);
    }

    #[tokio::test]
    async fn failed_envelopes_are_not_picked_up_again() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50)]).await;
        let dispatch = Arc::new(ScriptedDispatch::failing_on(1, "boom"));
        let processor = h.processor("node-a", dispatch.clone());

        let first = processor.process(10, &CancellationToken::new()).await.unwrap();
        let second = processor.process(10, &CancellationToken::new()).await.unwrap();

        assert_eq!(first.failed_count, 1);
        assert!(second.is_empty());
        assert_eq!(dispatch.calls(), vec![1]);
    }

    #[tokio::test]
    async fn undecodable_envelope_does_not_block_the_batch() {
        let h = Harness::new();
        h.seed(vec![
            placed_at(1, 50),
            OutboxMessage::from_raw(message_id(), OrderPlaced::TYPE, "{not json", at(51)),
            OutboxMessage::from_raw(message_id(), "sales.order.refunded.v1", "{}", at(52)),
            placed_at(2, 53),
        ])
        .await;
        let dispatch = Arc::new(ScriptedDispatch::new());

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed_count, 2);
        assert_eq!(report.failed_count, 2);
        assert!(report.failed_log.iter().all(|f| f.kind == Some(ErrorKind::Data)));
        assert!(report.failed_log[1].error.contains("sales.order.refunded.v1"));
        assert_eq!(dispatch.calls(), vec![1, 2]);
        // decode failures go straight to Failed: one save each, no Processing step
        assert_eq!(h.store.save_calls(), 2 * 2 + 2);
    }

    #[tokio::test]
    async fn batch_size_bounds_the_claim() {
        let h = Harness::new();
        h.seed((0..10).map(|i| placed_at(i, 40 + i as i64)).collect()).await;

        let report = h
            .processor("node-a", Arc::new(ScriptedDispatch::new()))
            .process(3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed_count, 3);
        let counts = h.store.count_by_status().await.unwrap();
        assert_eq!(counts.processed, 3);
        assert_eq!(counts.pending, 7);
    }

    #[tokio::test]
    async fn cancellation_stops_between_envelopes() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50), placed_at(2, 51), placed_at(3, 52)]).await;
        let cancel = CancellationToken::new();
        let dispatch = Arc::new(ScriptedDispatch::new().cancel_after(1, cancel.clone()));

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.processed_count, 1);
        let counts = h.store.count_by_status().await.unwrap();
        assert_eq!(counts.processed, 1);
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn failing_processing_save_is_recorded_as_failed() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50)]).await;
        h.store.fail_next_saves(1);
        let dispatch = Arc::new(ScriptedDispatch::new());

        let report = h
            .processor("node-a", dispatch.clone())
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed_count, 1);
        assert_eq!(report.failed_log[0].kind, Some(ErrorKind::Infrastructure));
        assert!(dispatch.calls().is_empty());
        let stored = h.store.snapshot().await;
        assert_eq!(stored[0].status(), OutboxStatus::Failed);
        assert!(stored[0].error().unwrap().contains("injected"));
    }

    #[tokio::test]
    async fn failing_fallback_save_leaves_envelope_processing() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50)]).await;
        let dispatch = Arc::new(ScriptedDispatch::new().fail_saves_after_dispatch(h.store.clone(), 2));

        let report = h
            .processor("node-a", dispatch)
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed_count, 1);
        let counts = h.store.count_by_status().await.unwrap();
        assert_eq!(counts.processing, 1);
    }

    #[tokio::test]
    async fn error_snippet_is_truncated_but_persisted_in_full() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50)]).await;
        let long = "x".repeat(500);
        let dispatch = Arc::new(ScriptedDispatch::failing_on(1, &long));

        let report = h
            .processor("node-a", dispatch)
            .process(10, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.failed_log[0].error.chars().count() <= 201);
        assert!(h.store.snapshot().await[0].error().unwrap().contains(&long));
    }

    #[tokio::test]
    async fn runs_with_the_real_pipeline() {
        let h = Harness::new();
        h.seed(vec![
            placed_at(7, 50),
            OutboxMessage::create(
                message_id(),
                &OrderShipped {
                    order_id: 7,
                    carrier: "posten".into(),
                },
                at(51),
            )
            .unwrap(),
        ])
        .await;
        let recorder = RecordingHandler::new("audit");
        let pipeline = OutboxBuilder::new()
            .handler::<OrderPlaced, _>(recorder.clone())
            .unwrap()
            .handler::<OrderShipped, _>(recorder.clone())
            .unwrap()
            .build()
            .unwrap();

        let processor = OutboxProcessor::from_pipeline(
            h.store.clone(),
            Arc::new(h.locks.session()),
            &pipeline,
            node_options("node-a"),
        )
        .with_clock(h.clock.clone());
        let report = processor.process(10, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.processed_count, 2);
        assert_eq!(
            recorder.seen(),
            vec!["audit:sales.order.placed.v1:7", "audit:sales.order.shipped.v1:7"]
        );
    }

    #[tokio::test]
    async fn resubmitted_failure_is_processed_on_the_next_tick() {
        let h = Harness::new();
        h.seed(vec![placed_at(1, 50)]).await;
        let failing = h.processor("node-a", Arc::new(ScriptedDispatch::failing_on(1, "down")));
        failing.process(10, &CancellationToken::new()).await.unwrap();

        // operator fixes the root cause and resets the envelope
        let mut message = h.store.snapshot().await.remove(0);
        message.requeue("resubmitted by operator");
        h.store.save(&mut message).await.unwrap();
        h.clock.advance(Duration::minutes(1));

        let report = h
            .processor("node-a", Arc::new(ScriptedDispatch::new()))
            .process(10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.processed_count, 1);
    }
}
