//! OutboxHost - drives the processor, the retention job and the reaper on timers.
//!
//! Each instance runs its own timers; there is no central coordinator.
//! Within one process a tick is skipped while the previous tick of the same
//! job is still running. Across processes the per-message lock does the job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::builder::EventPipeline;
use super::config::OutboxConfig;
use super::processor::OutboxProcessor;
use super::reaper::StaleProcessingReaper;
use super::retention::RetentionJob;
use crate::domain::{BatchReport, OutboxError, ReapReport, RetentionReport, StatusCounts};
use crate::ports::{LockProvider, OutboxStore, StoreError};

/// Set while a tick runs; cleared on drop, including on panic.
struct TickGuard(Arc<AtomicBool>);

impl TickGuard {
    fn try_enter(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct RunningFlags {
    poll: Arc<AtomicBool>,
    retention: Arc<AtomicBool>,
    reap: Arc<AtomicBool>,
}

pub struct OutboxHost {
    store: Arc<dyn OutboxStore>,
    processor: Arc<OutboxProcessor>,
    retention: Arc<RetentionJob>,
    reaper: Arc<StaleProcessingReaper>,
    config: OutboxConfig,
    running: RunningFlags,
}

impl OutboxHost {
    /// Wire the three jobs on the wall clock.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        locks: Arc<dyn LockProvider>,
        pipeline: &EventPipeline,
        config: OutboxConfig,
    ) -> Self {
        let processor = OutboxProcessor::from_pipeline(
            store.clone(),
            locks.clone(),
            pipeline,
            config.processor.clone(),
        );
        let retention = RetentionJob::new(store.clone(), config.retention.clone());
        let reaper = StaleProcessingReaper::new(store.clone(), locks, config.reaper.clone());
        Self::from_parts(store, processor, retention, reaper, config)
    }

    pub fn from_parts(
        store: Arc<dyn OutboxStore>,
        processor: OutboxProcessor,
        retention: RetentionJob,
        reaper: StaleProcessingReaper,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            processor: Arc::new(processor),
            retention: Arc::new(retention),
            reaper: Arc::new(reaper),
            config,
            running: RunningFlags::default(),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Run one processor tick now. `None` when a tick is already running.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Option<Result<BatchReport, OutboxError>> {
        let _guard = TickGuard::try_enter(&self.running.poll)?;
        Some(self.processor.process(self.config.processor.batch_size, cancel).await)
    }

    /// Run one retention sweep now. `None` when a sweep is already running.
    pub async fn retention_once(&self, cancel: &CancellationToken) -> Option<Result<RetentionReport, StoreError>> {
        let _guard = TickGuard::try_enter(&self.running.retention)?;
        Some(self.retention.run(cancel).await)
    }

    /// Run one stale-processing sweep now. `None` when a sweep is already running.
    pub async fn reap_once(&self, cancel: &CancellationToken) -> Option<Result<ReapReport, StoreError>> {
        let _guard = TickGuard::try_enter(&self.running.reap)?;
        Some(self.reaper.run(cancel).await)
    }

    pub async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        self.store.count_by_status().await
    }

    /// Start the timers. They stop when `cancel` fires or the handle shuts down.
    pub fn spawn(self, cancel: CancellationToken) -> HostHandle {
        let host = Arc::new(self);
        let mut joins = Vec::with_capacity(3);

        joins.push(spawn_job(
            host.clone(),
            cancel.clone(),
            "poll",
            host.config.scheduler.polling_interval,
            poll_tick,
        ));
        joins.push(spawn_job(
            host.clone(),
            cancel.clone(),
            "retention",
            host.config.retention.interval,
            retention_tick,
        ));
        if host.config.reaper.enabled {
            joins.push(spawn_job(
                host.clone(),
                cancel.clone(),
                "reaper",
                host.config.reaper.interval,
                reap_tick,
            ));
        }

        tracing::info!(
            node_id = %host.config.processor.node_id,
            polling_interval_ms = host.config.scheduler.polling_interval.as_millis() as u64,
            batch_size = host.config.processor.batch_size,
            reaper = host.config.reaper.enabled,
            "outbox host started"
        );
        HostHandle { cancel, joins }
    }
}

type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Tick = fn(Arc<OutboxHost>, CancellationToken) -> TickFuture;

fn poll_tick(host: Arc<OutboxHost>, cancel: CancellationToken) -> TickFuture {
    Box::pin(async move {
        match host.poll_once(&cancel).await {
            None => tracing::debug!("previous outbox tick still running; skipped"),
            Some(Ok(_)) => {}
            Some(Err(e)) => tracing::error!(error = %e, kind = ?e.kind(), "outbox tick failed"),
        }
    })
}

fn retention_tick(host: Arc<OutboxHost>, cancel: CancellationToken) -> TickFuture {
    Box::pin(async move {
        match host.retention_once(&cancel).await {
            None => tracing::debug!("previous retention sweep still running; skipped"),
            Some(Ok(_)) => {}
            Some(Err(e)) => tracing::error!(error = %e, "retention sweep failed"),
        }
    })
}

fn reap_tick(host: Arc<OutboxHost>, cancel: CancellationToken) -> TickFuture {
    Box::pin(async move {
        match host.reap_once(&cancel).await {
            None => tracing::debug!("previous reaper sweep still running; skipped"),
            Some(Ok(_)) => {}
            Some(Err(e)) => tracing::error!(error = %e, "stale processing sweep failed"),
        }
    })
}

/// Timer loop: every tick runs in its own task so a panic is contained and a
/// slow tick cannot delay the timer. The guard inside the tick rejects overlap.
fn spawn_job(
    host: Arc<OutboxHost>,
    cancel: CancellationToken,
    job: &'static str,
    period: Duration,
    tick: Tick,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            in_flight.spawn(tick(host.clone(), cancel.clone()));
            while let Some(finished) = in_flight.try_join_next() {
                log_join(job, finished);
            }
        }

        // let in-flight ticks finish their current envelope
        while let Some(finished) = in_flight.join_next().await {
            log_join(job, finished);
        }
        tracing::debug!(job, "outbox timer stopped");
    })
}

fn log_join(job: &'static str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(job, error = %e, "outbox tick task aborted");
    }
}

/// Handle to the spawned timers.
/// - `request_shutdown()` stops taking new ticks
/// - `shutdown_and_join()` also waits for in-flight ticks to finish
pub struct HostHandle {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl HostHandle {
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "outbox timer task aborted");
            }
        }
        tracing::info!("outbox host stopped");
    }
}
