//! StaleProcessingReaper - requeues envelopes orphaned in `Processing`.
//!
//! A node that crashes between "mark processing" and "mark processed/failed"
//! leaves its envelope in `Processing`, where the pending query never sees it
//! again. Once the grace period has passed the reaper puts it back to
//! `Pending`, taking the same per-message lock as the processor so it never
//! races a live dispatch. The handler may therefore run a second time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::ReaperOptions;
use crate::domain::{OutboxStatus, ReapReport};
use crate::ports::{Clock, LockProvider, OutboxStore, StoreError, SystemClock, message_lock_name};

pub struct StaleProcessingReaper {
    store: Arc<dyn OutboxStore>,
    locks: Arc<dyn LockProvider>,
    clock: Arc<dyn Clock>,
    options: ReaperOptions,
}

impl StaleProcessingReaper {
    pub fn new(store: Arc<dyn OutboxStore>, locks: Arc<dyn LockProvider>, options: ReaperOptions) -> Self {
        Self {
            store,
            locks,
            clock: Arc::new(SystemClock),
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReapReport, StoreError> {
        let now = self.clock.now();
        let started_before = now.checked_sub_signed(self.options.stale_after).ok_or_else(|| {
            StoreError::Backend(format!("stale grace {} is out of range", self.options.stale_after))
        })?;
        let stale = self
            .store
            .query_stale_processing(started_before, self.options.batch_size)
            .await?;

        let mut report = ReapReport::default();
        for mut message in stale {
            if cancel.is_cancelled() {
                break;
            }

            let lock = self.locks.create_lock(&message_lock_name(message.id()));
            let mut handle = match lock.try_acquire(std::time::Duration::ZERO, cancel).await {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(lock = lock.name(), error = %e, "lock backend unavailable");
                    report.skipped += 1;
                    continue;
                }
            };

            let requeued = match self.store.query_status(message.id()).await {
                Ok(Some(OutboxStatus::Processing)) => {
                    let started = message.processing_started_on_utc();
                    let owner = message.processed_by_machine().unwrap_or("unknown").to_string();
                    message.requeue(format!(
                        "requeued after being stuck in processing on {owner} since {}",
                        started.map_or_else(|| "an unknown time".to_string(), |t| t.to_rfc3339())
                    ));
                    match self.store.save(&mut message).await {
                        Ok(()) => {
                            tracing::warn!(
                                message_id = %message.id(),
                                event_type = message.event_type(),
                                owner = %owner,
                                "requeued stale processing envelope"
                            );
                            true
                        }
                        Err(e) => {
                            tracing::warn!(message_id = %message.id(), error = %e, "requeue failed");
                            false
                        }
                    }
                }
                Ok(_) => false,
                Err(e) => {
                    tracing::warn!(message_id = %message.id(), error = %e, "status re-check failed");
                    false
                }
            };

            if let Err(e) = handle.release().await {
                tracing::warn!(lock = handle.name(), error = %e, "lock release failed");
            }

            if requeued {
                report.requeued += 1;
            } else {
                report.skipped += 1;
            }
        }

        if report.requeued > 0 || report.skipped > 0 {
            tracing::info!(requeued = report.requeued, skipped = report.skipped, "stale processing sweep finished");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryAdvisoryLocks, InMemoryOutboxStore};
    use crate::ports::{FixedClock, LockProvider, message_lock_name};
    use crate::testing::{at, placed_at};
    use chrono::Duration;

    struct Harness {
        store: Arc<InMemoryOutboxStore>,
        locks: InMemoryAdvisoryLocks,
        clock: Arc<FixedClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryOutboxStore::new()),
                locks: InMemoryAdvisoryLocks::new(),
                clock: Arc::new(FixedClock::new(at(0))),
            }
        }

        fn reaper(&self) -> StaleProcessingReaper {
            StaleProcessingReaper::new(
                self.store.clone(),
                Arc::new(self.locks.session()),
                ReaperOptions::default(),
            )
            .with_clock(self.clock.clone())
        }
    }

    #[tokio::test]
    async fn requeues_envelopes_past_the_grace_period() {
        let h = Harness::new();
        let mut stuck = placed_at(1, 0);
        stuck.mark_processing("node-crashed", at(0));
        let mut fresh = placed_at(2, 0);
        fresh.mark_processing("node-alive", at(25));
        let stuck_id = stuck.id();
        h.store.append(vec![stuck, fresh]).await.unwrap();

        h.clock.set(at(30));
        let report = h.reaper().run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report, ReapReport { requeued: 1, skipped: 0 });
        let requeued = h.store.get(stuck_id).await.unwrap().unwrap();
        assert_eq!(requeued.status(), OutboxStatus::Pending);
        assert!(requeued.error().unwrap().contains("node-crashed"));
        let counts = h.store.count_by_status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
    }

    #[tokio::test]
    async fn out_of_range_grace_is_an_error_not_a_panic() {
        let h = Harness::new();
        let reaper = StaleProcessingReaper::new(
            h.store.clone(),
            Arc::new(h.locks.session()),
            ReaperOptions {
                stale_after: Duration::days(100_000_000),
                ..ReaperOptions::default()
            },
        )
        .with_clock(h.clock.clone());

        let err = reaper.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(text) if text.contains("out of range")));
    }

    #[tokio::test]
    async fn requeued_envelope_is_picked_up_by_the_pending_query() {
        let h = Harness::new();
        let mut stuck = placed_at(1, 0);
        stuck.mark_processing("node-crashed", at(0));
        h.store.append(vec![stuck]).await.unwrap();
        h.clock.advance(Duration::hours(1));

        h.reaper().run(&CancellationToken::new()).await.unwrap();

        let pending = h.store.query_pending(10, h.clock.now()).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn locked_envelope_is_left_alone() {
        let h = Harness::new();
        let mut stuck = placed_at(1, 0);
        stuck.mark_processing("node-slow", at(0));
        let stuck_id = stuck.id();
        h.store.append(vec![stuck]).await.unwrap();
        h.clock.advance(Duration::hours(1));

        // a live node is still dispatching it
        let holder = h.locks.session();
        let _held = holder
            .create_lock(&message_lock_name(stuck_id))
            .try_acquire(std::time::Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let report = h.reaper().run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report, ReapReport { requeued: 0, skipped: 1 });
        assert_eq!(
            h.store.get(stuck_id).await.unwrap().unwrap().status(),
            OutboxStatus::Processing
        );
    }
}
