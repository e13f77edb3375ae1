//! Batch consumer feeding stream records into the dedup pipeline.
//!
//! A batch is committed as a unit once the impressions it carries are
//! persisted and marked as seen. If anything downstream fails the batch is
//! rewound instead, so the next poll delivers the same records again.

mod kafka;

pub use self::kafka::KafkaBatchSource;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WorkerError};
use crate::metrics::WorkerMetrics;
use crate::models::Impression;
use crate::services::command::{ImpressionCommandService, StoreOutcome};
use crate::services::recently_seen::RecentlySeenStore;
use crate::services::writer::ImpressionWriter;

/// Pause after a failed poll before asking the source again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// One record as delivered by the stream, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

impl RawRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload,
        }
    }
}

/// Position in a single topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Records pulled by one poll, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    records: Vec<RawRecord>,
}

impl RecordBatch {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next offset to consume per partition (highest offset in batch + 1).
    pub fn commit_offsets(&self) -> Vec<PartitionOffset> {
        self.offsets_by(|current, offset| current.max(offset))
            .into_iter()
            .map(|mut o| {
                o.offset += 1;
                o
            })
            .collect()
    }

    /// Lowest offset per partition, where redelivery has to start.
    pub fn rewind_offsets(&self) -> Vec<PartitionOffset> {
        self.offsets_by(|current, offset| current.min(offset))
    }

    fn offsets_by(&self, pick: impl Fn(i64, i64) -> i64) -> Vec<PartitionOffset> {
        let mut offsets: BTreeMap<(&str, i32), i64> = BTreeMap::new();
        for record in &self.records {
            offsets
                .entry((record.topic.as_str(), record.partition))
                .and_modify(|current| *current = pick(*current, record.offset))
                .or_insert(record.offset);
        }

        offsets
            .into_iter()
            .map(|((topic, partition), offset)| PartitionOffset {
                topic: topic.to_string(),
                partition,
                offset,
            })
            .collect()
    }
}

/// Stream of record batches with explicit acknowledgement.
#[async_trait]
pub trait BatchSource: Send {
    /// Wait for the next batch. An empty batch means nothing arrived in time.
    async fn next_batch(&mut self) -> Result<RecordBatch>;

    /// Acknowledge every record in the batch.
    async fn commit(&mut self, batch: &RecordBatch) -> Result<()>;

    /// Arrange for the batch to be delivered again.
    ///
    /// Failures should be reported as [`WorkerError::Rewind`]; the consumer
    /// stops on any rewind failure either way.
    async fn rewind(&mut self, batch: &RecordBatch) -> Result<()>;
}

/// Pulls batches from a [`BatchSource`] and hands the parsed impressions to
/// the command service, one batch at a time.
pub struct BatchConsumer<S, R, W> {
    source: S,
    service: ImpressionCommandService<R, W>,
    metrics: WorkerMetrics,
    shutdown: watch::Receiver<bool>,
}

impl<S, R, W> BatchConsumer<S, R, W>
where
    S: BatchSource,
    R: RecentlySeenStore,
    W: ImpressionWriter,
{
    pub fn new(
        source: S,
        service: ImpressionCommandService<R, W>,
        metrics: WorkerMetrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            service,
            metrics,
            shutdown,
        }
    }

    pub fn service(&self) -> &ImpressionCommandService<R, W> {
        &self.service
    }

    /// Run until the shutdown signal flips to `true`.
    ///
    /// Shutdown is only observed between batches; a batch that has been
    /// pulled is always processed to completion. A batch that could neither
    /// be stored nor rewound ends the loop with [`WorkerError::Rewind`]:
    /// committing anything after it would skip its records for good.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting impression consumer loop");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let polled = match self.poll_until_shutdown().await {
                Some(polled) => polled,
                None => {
                    info!("Shutdown signal received, stopping consumer");
                    break;
                }
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e @ WorkerError::Rewind(_)) => {
                    error!(error = %e, "Partial batch could not be rewound, stopping consumer");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive batch");
                    tokio::select! {
                        _ = self.shutdown.changed() => {}
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                continue;
            }

            self.handle_batch(&batch).await?;
        }

        info!("Impression consumer stopped");
        Ok(())
    }

    /// Next batch from the source, or `None` once shutdown is requested.
    ///
    /// A signal change that leaves the value at `false` keeps polling the
    /// same future, so records it already pulled are not dropped.
    async fn poll_until_shutdown(&mut self) -> Option<Result<RecordBatch>> {
        let shutdown = &mut self.shutdown;
        let next = self.source.next_batch();
        tokio::pin!(next);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
                polled = &mut next => return Some(polled),
            }
        }
    }

    async fn handle_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        debug!(records = batch.len(), "Processing batch");

        match self.process_batch(batch).await {
            Ok(outcome) => {
                self.metrics.impressions_written.inc_by(outcome.written as u64);
                self.metrics.duplicates_skipped.inc_by(outcome.skipped() as u64);

                if let Err(e) = self.source.commit(batch).await {
                    error!(error = %e, records = batch.len(), "Failed to commit batch offsets");
                    return Ok(());
                }
                self.metrics.batches_committed.inc();

                info!(
                    records = batch.len(),
                    written = outcome.written,
                    skipped = outcome.skipped(),
                    "Batch committed"
                );
            }
            Err(e) => {
                error!(
                    error = %e,
                    records = batch.len(),
                    "Failed to store impressions, batch will be redelivered"
                );
                self.metrics.batches_rewound.inc();

                if let Err(e) = self.source.rewind(batch).await {
                    error!(error = %e, "Failed to rewind batch, stopping consumer");
                    return Err(match e {
                        WorkerError::Rewind(_) => e,
                        other => WorkerError::Rewind(other.to_string()),
                    });
                }
            }
        }

        Ok(())
    }

    async fn process_batch(&self, batch: &RecordBatch) -> Result<StoreOutcome> {
        let mut impressions = Vec::with_capacity(batch.len());

        for record in batch.records() {
            match Impression::from_payload(record.payload.as_deref()) {
                Ok(impression) => impressions.push(impression),
                Err(e) => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Dropping malformed impression record"
                    );
                    self.metrics.records_dropped.inc();
                }
            }
        }

        self.service.store_impressions(&impressions).await
    }
}
