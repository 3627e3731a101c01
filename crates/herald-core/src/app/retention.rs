//! RetentionJob - hard-deletes old `Processed` envelopes in small batches.
//!
//! `Failed` envelopes are never touched: they wait for an operator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::RetentionOptions;
use crate::domain::RetentionReport;
use crate::ports::{Clock, OutboxStore, StoreError, SystemClock};

pub struct RetentionJob {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    options: RetentionOptions,
}

impl RetentionJob {
    pub fn new(store: Arc<dyn OutboxStore>, options: RetentionOptions) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delete batches until one comes back empty or `cancel` fires.
    /// Rows already deleted stay deleted when a later round fails.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RetentionReport, StoreError> {
        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(self.options.window).ok_or_else(|| {
            StoreError::Backend(format!("retention window {} is out of range", self.options.window))
        })?;
        let mut report = RetentionReport::default();

        while !cancel.is_cancelled() {
            let deleted = self
                .store
                .delete_processed_before(cutoff, self.options.delete_batch_size)
                .await?;
            report.rounds += 1;
            report.deleted += deleted;
            if deleted == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        if report.deleted > 0 {
            tracing::info!(deleted = report.deleted, rounds = report.rounds, %cutoff, "retention sweep finished");
        } else {
            tracing::debug!(%cutoff, "retention sweep found nothing to delete");
        }
        Ok(report)
    }
}
