use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::{BatchSource, PartitionOffset, RawRecord, RecordBatch};
use crate::config::KafkaConsumerConfig;
use crate::error::{Result, WorkerError};

const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka-backed batch source with manual offset management.
///
/// Auto-commit is disabled: offsets only move when a batch is committed, and
/// a failed batch is re-read by seeking each partition back to the first
/// offset the batch contained.
pub struct KafkaBatchSource {
    consumer: StreamConsumer,
    max_batch_size: usize,
    max_batch_wait: Duration,
}

impl KafkaBatchSource {
    /// Create the consumer and subscribe to the configured topic.
    pub fn new(config: &KafkaConsumerConfig) -> Result<Self> {
        info!(
            brokers = %config.bootstrap_servers(),
            group_id = %config.group_id,
            client_id = %config.client_id,
            topic = %config.topic,
            "Initializing impression consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("client.id", &config.client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                WorkerError::Kafka(e.to_string())
            })?;

        consumer.subscribe(&[config.topic.as_str()]).map_err(|e| {
            error!("Failed to subscribe to topic {}: {}", config.topic, e);
            WorkerError::Kafka(e.to_string())
        })?;

        info!("Impression consumer subscribed to topic: {}", config.topic);

        Ok(Self {
            consumer,
            max_batch_size: config.max_batch_size,
            max_batch_wait: config.max_batch_wait,
        })
    }
}

impl From<&BorrowedMessage<'_>> for RawRecord {
    fn from(msg: &BorrowedMessage<'_>) -> Self {
        RawRecord::new(
            msg.topic(),
            msg.partition(),
            msg.offset(),
            msg.payload().map(|p| p.to_vec()),
        )
    }
}

#[async_trait]
impl BatchSource for KafkaBatchSource {
    async fn next_batch(&mut self) -> Result<RecordBatch> {
        let mut records = Vec::with_capacity(self.max_batch_size);
        let mut receive_error = None;

        let deadline = sleep(self.max_batch_wait);
        tokio::pin!(deadline);

        while records.len() < self.max_batch_size {
            tokio::select! {
                _ = &mut deadline => break,
                received = self.consumer.recv() => match received {
                    Ok(msg) => {
                        debug!(
                            "Received impression message: topic={}, partition={}, offset={}",
                            msg.topic(),
                            msg.partition(),
                            msg.offset()
                        );
                        records.push(RawRecord::from(&msg));
                    }
                    Err(e) => {
                        receive_error = Some(e);
                        break;
                    }
                },
            }
        }

        let batch = RecordBatch::new(records);

        if let Some(e) = receive_error {
            error!(
                error = %e,
                received = batch.len(),
                "Kafka consumer error, discarding partial batch"
            );
            if !batch.is_empty() {
                self.rewind(&batch).await?;
            }
            return Err(e.into());
        }

        Ok(batch)
    }

    async fn commit(&mut self, batch: &RecordBatch) -> Result<()> {
        let offsets = batch.commit_offsets();
        if offsets.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for o in &offsets {
            tpl.add_partition_offset(&o.topic, o.partition, Offset::Offset(o.offset))?;
        }

        self.consumer.commit(&tpl, CommitMode::Async).map_err(|e| {
            error!("Failed to commit offsets {:?}: {}", offsets, e);
            WorkerError::Kafka(e.to_string())
        })?;

        debug!(partitions = offsets.len(), "Committed batch offsets");
        Ok(())
    }

    async fn rewind(&mut self, batch: &RecordBatch) -> Result<()> {
        let consumer = &self.consumer;
        seek_all(&batch.rewind_offsets(), |o| {
            consumer.seek(&o.topic, o.partition, Offset::Offset(o.offset), SEEK_TIMEOUT)
        })
    }
}

/// Seek every partition, even after one fails, and report all failures as a
/// single [`WorkerError::Rewind`].
fn seek_all<F>(offsets: &[PartitionOffset], mut seek: F) -> Result<()>
where
    F: FnMut(&PartitionOffset) -> KafkaResult<()>,
{
    let mut failed = Vec::new();

    for o in offsets {
        match seek(o) {
            Ok(()) => debug!(
                topic = %o.topic,
                partition = o.partition,
                offset = o.offset,
                "Rewound partition for redelivery"
            ),
            Err(e) => {
                error!(
                    "Failed to seek {}[{}] to offset {}: {}",
                    o.topic, o.partition, o.offset, e
                );
                failed.push(format!("{}[{}]@{}: {}", o.topic, o.partition, o.offset, e));
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(WorkerError::Rewind(format!(
            "failed to seek {} of {} partitions: {}",
            failed.len(),
            offsets.len(),
            failed.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::KafkaError;

    fn offset(partition: i32, offset: i64) -> PartitionOffset {
        PartitionOffset {
            topic: "impressions".to_string(),
            partition,
            offset,
        }
    }

    #[test]
    fn test_seek_all_tries_every_partition() {
        let offsets = vec![offset(0, 10), offset(1, 4), offset(2, 7)];
        let mut attempted = Vec::new();

        let result = seek_all(&offsets, |o| {
            attempted.push(o.partition);
            if o.partition == 0 {
                Err(KafkaError::Seek("partition not assigned".to_string()))
            } else {
                Ok(())
            }
        });

        assert_eq!(attempted, vec![0, 1, 2]);
        match result {
            Err(WorkerError::Rewind(msg)) => {
                assert!(msg.contains("1 of 3"));
                assert!(msg.contains("impressions[0]@10"));
            }
            other => panic!("expected rewind error, got {:?}", other),
        }
    }

    #[test]
    fn test_seek_all_succeeds() {
        let offsets = vec![offset(0, 10), offset(1, 4)];
        assert!(seek_all(&offsets, |_| Ok(())).is_ok());
        assert!(seek_all(&[], |_| Ok(())).is_ok());
    }
}
