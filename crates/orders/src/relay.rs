//! Moves committed outbox rows onto the broker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{SagaSignal, SagaStage};
use messaging::Publisher;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::{OrderError, Result, store::OrderStore};

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

/// Publishes unpublished outbox rows in id order.
///
/// A row is marked published only after the broker accepted it, so a crash
/// at any point leads to a republish rather than a lost event. Consumers
/// must therefore tolerate duplicates.
pub struct OutboxRelay<S: OrderStore> {
    store: S,
    publisher: Publisher,
    signal: Arc<Notify>,
    batch_size: usize,
    poll_interval: Duration,
    storage_timeout: Duration,
}

impl<S: OrderStore + 'static> OutboxRelay<S> {
    /// Creates a relay woken by `signal` (see [`OrderService::relay_signal`](crate::OrderService::relay_signal)).
    pub fn new(store: S, publisher: Publisher, signal: Arc<Notify>) -> Self {
        Self {
            store,
            publisher,
            signal,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Bounds every store call made by a pass.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Runs a single pass over the unpublished rows.
    ///
    /// Stops at the first publish failure so rows leave in order; the
    /// failure is recorded on the row and retried on the next pass.
    pub async fn run_once(&self) -> Result<RelayReport> {
        let mut report = RelayReport::default();
        if !self.publisher.connections().is_connected() {
            tracing::debug!("broker not connected, outbox relay pass skipped");
            return Ok(report);
        }

        for row in self.timed(self.store.unpublished(self.batch_size)).await? {
            match self
                .publisher
                .publish_message(&row.queue, row.to_message())
                .await
            {
                Ok(()) => {
                    self.timed(self.store.mark_published(row.id)).await?;
                    report.published += 1;
                    metrics::counter!("outbox_published_total").increment(1);

                    let stage = SagaStage::OrderPending
                        .advance(SagaSignal::OrderCreatedPublished)
                        .unwrap_or(SagaStage::OrderPending);
                    tracing::info!(
                        outbox_id = row.id,
                        order_id = row.correlation_id.as_deref().unwrap_or_default(),
                        stage = %stage,
                        "order event published"
                    );
                }
                Err(e) => {
                    self.timed(self.store.record_publish_failure(row.id, &e.to_string()))
                        .await?;
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        outbox_id = row.id,
                        attempts = row.attempts + 1,
                        error = %e,
                        "outbox publish failed"
                    );
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn timed<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, operation)
            .await
            .map_err(|_| OrderError::StorageTimeout(self.storage_timeout))?
    }

    /// Relays forever, one pass per wake-up or poll interval.
    pub async fn run(self) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            storage_timeout_ms = self.storage_timeout.as_millis() as u64,
            "outbox relay started"
        );
        loop {
            match self.run_once().await {
                Ok(report) if report.published > 0 || report.failed > 0 => {
                    tracing::debug!(
                        published = report.published,
                        failed = report.failed,
                        "outbox relay pass"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "outbox relay pass failed"),
            }

            tokio::select! {
                _ = self.signal.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
