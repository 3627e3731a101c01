//! Shared test fixtures: sample events, recording handlers and scripted dispatchers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::app::ProcessorOptions;
use crate::domain::{MessageId, OutboxMessage, OutboxStatus, StatusCounts};
use crate::impls::InMemoryOutboxStore;
use crate::ports::{
    Dispatch, DispatchContext, DispatchError, HandlerError, HandlerFailure, OutboxStore, StoreError,
};
use crate::typed::{AnyEvent, DomainEvent, EventHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: u64,
}

impl DomainEvent for OrderPlaced {
    const TYPE: &'static str = "sales.order.placed.v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: u64,
    pub carrier: String,
}

impl DomainEvent for OrderShipped {
    const TYPE: &'static str = "sales.order.shipped.v1";
}

pub trait HasOrderId {
    fn order_id(&self) -> u64;
}

impl HasOrderId for OrderPlaced {
    fn order_id(&self) -> u64 {
        self.order_id
    }
}

impl HasOrderId for OrderShipped {
    fn order_id(&self) -> u64 {
        self.order_id
    }
}

fn order_id_of(event: &dyn AnyEvent) -> Option<u64> {
    event
        .downcast_ref::<OrderPlaced>()
        .map(|e| e.order_id)
        .or_else(|| event.downcast_ref::<OrderShipped>().map(|e| e.order_id))
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// `start()` plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    start() + chrono::Duration::minutes(minutes)
}

pub fn message_id() -> MessageId {
    MessageId::from_ulid(ulid::Ulid::new())
}

pub fn placed_at(order_id: u64, minute: i64) -> OutboxMessage {
    OutboxMessage::create(message_id(), &OrderPlaced { order_id }, at(minute)).unwrap()
}

pub fn node_options(node_id: &str) -> ProcessorOptions {
    ProcessorOptions {
        node_id: node_id.to_string(),
        ..ProcessorOptions::default()
    }
}

/// Records `{label}:{event type}:{order id}` for every event it handles.
/// Clones and `with_label` copies share one log.
#[derive(Clone)]
pub struct RecordingHandler {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_label(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            log: self.log.clone(),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl<E: DomainEvent + HasOrderId> EventHandler<E> for RecordingHandler {
    async fn handle(&self, event: &E, _ctx: &DispatchContext) -> Result<(), HandlerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", self.label, E::TYPE, event.order_id()));
        Ok(())
    }
}

pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl<E: DomainEvent> EventHandler<E> for FailingHandler {
    async fn handle(&self, _event: &E, _ctx: &DispatchContext) -> Result<(), HandlerError> {
        Err(HandlerError::new(&self.message))
    }
}

/// Panics when it sees `order_id`; other orders pass.
pub struct PanickingHandler {
    order_id: u64,
}

impl PanickingHandler {
    pub fn on_order(order_id: u64) -> Self {
        Self { order_id }
    }
}

#[async_trait]
impl<E: DomainEvent + HasOrderId> EventHandler<E> for PanickingHandler {
    async fn handle(&self, event: &E, _ctx: &DispatchContext) -> Result<(), HandlerError> {
        if event.order_id() == self.order_id {
            panic!("poison order {}", self.order_id);
        }
        Ok(())
    }
}

/// Dispatcher stand-in that records order ids and fails or cancels on cue.
#[derive(Default)]
pub struct ScriptedDispatch {
    calls: Mutex<Vec<u64>>,
    fail_on: Option<(usize, String)>,
    panic_on: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    break_saves: Option<(Arc<InMemoryOutboxStore>, usize)>,
}

impl ScriptedDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` call (1-based).
    pub fn failing_on(nth: usize, message: &str) -> Self {
        Self {
            fail_on: Some((nth, message.to_string())),
            ..Self::default()
        }
    }

    /// Panic on the `nth` call (1-based), as a misbehaving `Dispatch` would.
    pub fn panicking_on(nth: usize) -> Self {
        Self {
            panic_on: Some(nth),
            ..Self::default()
        }
    }

    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// Make the store's next `n` saves fail once dispatch has run.
    pub fn fail_saves_after_dispatch(mut self, store: Arc<InMemoryOutboxStore>, n: usize) -> Self {
        self.break_saves = Some((store, n));
        self
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for ScriptedDispatch {
    async fn dispatch(&self, events: &[&dyn AnyEvent], _ctx: &DispatchContext) -> Result<(), DispatchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.extend(events.iter().filter_map(|e| order_id_of(*e)));
            calls.len()
        };
        if let Some((after, token)) = &self.cancel_after
            && call >= *after
        {
            token.cancel();
        }
        if self.panic_on == Some(call) {
            panic!("dispatcher crashed on call {call}");
        }
        if let Some((store, n)) = &self.break_saves {
            store.fail_next_saves(*n);
        }
        match &self.fail_on {
            Some((nth, message)) if *nth == call => Err(DispatchError::HandlersFailed(vec![HandlerFailure {
                event_type: events[0].event_type().to_string(),
                handler: "ScriptedDispatch".to_string(),
                error: HandlerError::new(message),
            }])),
            _ => Ok(()),
        }
    }
}

/// Dispatcher that blocks inside `dispatch` until `open()` is called.
pub struct GatedDispatch {
    entered: Notify,
    gate: watch::Sender<bool>,
    dispatched: AtomicUsize,
}

impl GatedDispatch {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            gate: watch::Sender::new(false),
            dispatched: AtomicUsize::new(0),
        }
    }

    /// Resolves once some dispatch is waiting at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatch for GatedDispatch {
    async fn dispatch(&self, _events: &[&dyn AnyEvent], _ctx: &DispatchContext) -> Result<(), DispatchError> {
        self.entered.notify_one();
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store whose pending query keeps returning the batch captured earlier, as
/// seen by a node that queried just before a peer processed everything.
pub struct StaleSnapshotStore {
    inner: Arc<InMemoryOutboxStore>,
    pending: Vec<OutboxMessage>,
}

impl StaleSnapshotStore {
    pub async fn capture(inner: Arc<InMemoryOutboxStore>) -> Self {
        let pending = inner
            .snapshot()
            .await
            .into_iter()
            .filter(|m| m.status() == OutboxStatus::Pending)
            .collect();
        Self { inner, pending }
    }
}

#[async_trait]
impl OutboxStore for StaleSnapshotStore {
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), StoreError> {
        self.inner.append(messages).await
    }

    async fn query_pending(&self, limit: usize, _now: DateTime<Utc>) -> Result<Vec<OutboxMessage>, StoreError> {
        Ok(self.pending.iter().take(limit).cloned().collect())
    }

    async fn query_status(&self, id: MessageId) -> Result<Option<OutboxStatus>, StoreError> {
        self.inner.query_status(id).await
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>, StoreError> {
        self.inner.get(id).await
    }

    async fn save(&self, message: &mut OutboxMessage) -> Result<(), StoreError> {
        self.inner.save(message).await
    }

    async fn delete_processed_before(&self, before: DateTime<Utc>, limit: usize) -> Result<u64, StoreError> {
        self.inner.delete_processed_before(before, limit).await
    }

    async fn query_stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        self.inner.query_stale_processing(started_before, limit).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        self.inner.count_by_status().await
    }
}
