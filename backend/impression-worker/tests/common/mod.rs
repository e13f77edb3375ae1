//! Shared fakes for the impression-worker integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use impression_worker::error::{Result, WorkerError};
use impression_worker::models::Impression;
use impression_worker::services::{
    BatchSource, ImpressionWriter, RawRecord, RecentlySeenStore, RecordBatch,
};
use tokio::sync::watch;

/// Calls observed by the fakes, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    HasMany(usize),
    AddMany(Vec<Impression>),
    WriteMany(Vec<Impression>),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Writer that records every batch and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub rows: Arc<Mutex<Vec<Impression>>>,
    pub fail: Arc<AtomicBool>,
    failures_left: Arc<AtomicUsize>,
    log: Option<CallLog>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `times` writes, then recover.
    pub fn fail_times(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Impression> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImpressionWriter for RecordingWriter {
    async fn write_many(&self, impressions: &[Impression]) -> Result<()> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(Call::WriteMany(impressions.to_vec()));
        }
        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure || self.fail.load(Ordering::SeqCst) {
            return Err(WorkerError::ClickHouse("connection refused".to_string()));
        }
        self.rows.lock().unwrap().extend_from_slice(impressions);
        Ok(())
    }
}

/// Store with scripted `has_many` answers, keeping a log of calls.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    seen_ids: Arc<Mutex<Vec<String>>>,
    pub fail_add: Arc<AtomicBool>,
    log: Option<CallLog>,
}

impl ScriptedStore {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    /// Report impressions with this id as already seen.
    pub fn mark_seen(&self, id: &str) {
        self.seen_ids.lock().unwrap().push(id.to_string());
    }

    fn record(&self, call: Call) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(call);
        }
    }
}

#[async_trait]
impl RecentlySeenStore for ScriptedStore {
    async fn has(&self, impression: &Impression) -> Result<bool> {
        Ok(self.seen_ids.lock().unwrap().contains(&impression.id))
    }

    async fn add(&self, impression: &Impression) -> Result<()> {
        self.add_many(std::slice::from_ref(impression)).await
    }

    async fn has_many(&self, impressions: &[Impression]) -> Result<Vec<bool>> {
        self.record(Call::HasMany(impressions.len()));
        let seen = self.seen_ids.lock().unwrap();
        Ok(impressions.iter().map(|i| seen.contains(&i.id)).collect())
    }

    async fn add_many(&self, impressions: &[Impression]) -> Result<()> {
        self.record(Call::AddMany(impressions.to_vec()));
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(WorkerError::Internal("valkey unavailable".to_string()));
        }
        let mut seen = self.seen_ids.lock().unwrap();
        seen.extend(impressions.iter().map(|i| i.id.clone()));
        Ok(())
    }
}

/// What a [`ScriptedSource`] was asked to do with each batch.
#[derive(Clone, Default)]
pub struct SourceLog {
    pub committed: Arc<Mutex<Vec<RecordBatch>>>,
    pub rewound: Arc<Mutex<Vec<RecordBatch>>>,
}

impl SourceLog {
    pub fn committed(&self) -> usize {
        self.committed.lock().unwrap().len()
    }

    pub fn rewound(&self) -> usize {
        self.rewound.lock().unwrap().len()
    }
}

/// Hands out a fixed sequence of batches, then signals shutdown.
pub struct ScriptedSource {
    batches: VecDeque<Result<RecordBatch>>,
    shutdown: watch::Sender<bool>,
    log: SourceLog,
    fail_rewind: bool,
    poll_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(
        batches: Vec<Result<RecordBatch>>,
        shutdown: watch::Sender<bool>,
    ) -> (Self, SourceLog) {
        let log = SourceLog::default();
        let source = Self {
            batches: batches.into(),
            shutdown,
            log: log.clone(),
            fail_rewind: false,
            poll_delay: None,
        };
        (source, log)
    }

    /// Every `rewind` call fails after being logged.
    pub fn with_failing_rewind(mut self) -> Self {
        self.fail_rewind = true;
        self
    }

    /// Hold each scripted batch for `delay` after taking it off the queue.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }
}

#[async_trait]
impl BatchSource for ScriptedSource {
    async fn next_batch(&mut self) -> Result<RecordBatch> {
        match self.batches.pop_front() {
            Some(batch) => {
                if let Some(delay) = self.poll_delay {
                    tokio::time::sleep(delay).await;
                }
                batch
            }
            None => {
                let _ = self.shutdown.send(true);
                Ok(RecordBatch::default())
            }
        }
    }

    async fn commit(&mut self, batch: &RecordBatch) -> Result<()> {
        self.log.committed.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn rewind(&mut self, batch: &RecordBatch) -> Result<()> {
        self.log.rewound.lock().unwrap().push(batch.clone());
        if self.fail_rewind {
            return Err(WorkerError::Kafka("seek failed".to_string()));
        }
        Ok(())
    }
}

pub fn impression_json(id: &str, ts: i64, user_id: &str, ad_id: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"{}","ts":{},"userId":"{}","adId":"{}"}}"#,
        id, ts, user_id, ad_id
    )
    .into_bytes()
}

/// Batch of records on partition 0 starting at `first_offset`.
pub fn batch(first_offset: i64, payloads: Vec<Option<Vec<u8>>>) -> RecordBatch {
    RecordBatch::new(
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| RawRecord::new("impressions", 0, first_offset + i as i64, payload))
            .collect(),
    )
}
