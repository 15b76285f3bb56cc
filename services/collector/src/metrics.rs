//! # Runtime Metrics State
//!
//! Process-wide counters written concurrently by every stage worker and the ingest side.
//! Each field is an independent atomic: increments are never lost, but a
//! [`MetricsSnapshot`] is not a transactional view across fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use types::{Stage, STAGE_COUNT};

const NO_ACTIVE_TASK: u8 = u8::MAX;

#[derive(Debug)]
pub struct RuntimeMetrics {
    active_task: AtomicU8,
    time_lag_ns: [AtomicU64; STAGE_COUNT],
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    rows_processed: AtomicU64,
    envelopes_retired: AtomicU64,
    decode_errors: AtomicU64,
    sink_retries: AtomicU64,
    replays: AtomicU64,
    active_workers: AtomicUsize,
    ready: AtomicBool,
    started_at: Instant,
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self {
            active_task: AtomicU8::new(NO_ACTIVE_TASK),
            time_lag_ns: Default::default(),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            envelopes_retired: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            sink_retries: AtomicU64::new(0),
            replays: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Record `stage` as the most recently scheduled stage
    pub fn set_active_task(&self, stage: Stage) {
        self.active_task.store(stage as u8, Ordering::Relaxed);
    }

    pub fn active_task(&self) -> Option<Stage> {
        Stage::try_from(self.active_task.load(Ordering::Relaxed)).ok()
    }

    pub fn record_lag(&self, stage: Stage, lag: Duration) {
        let nanos = u64::try_from(lag.as_nanos()).unwrap_or(u64::MAX);
        self.time_lag_ns[stage.index()].store(nanos, Ordering::Relaxed);
    }

    pub fn time_lag(&self, stage: Stage) -> Duration {
        Duration::from_nanos(self.time_lag_ns[stage.index()].load(Ordering::Relaxed))
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_rows_processed(&self, rows: u64) {
        self.rows_processed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_retired(&self) {
        self.envelopes_retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_retry(&self) {
        self.sink_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Relaxed)
    }

    pub fn envelopes_retired(&self) -> u64 {
        self.envelopes_retired.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn sink_retries(&self) -> u64 {
        self.sink_retries.load(Ordering::Relaxed)
    }

    pub fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    /// Count a running worker until the returned guard drops
    pub fn worker_guard(self: &Arc<Self>) -> WorkerGuard {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
        WorkerGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn snapshot(&self, queue_depth: usize) -> MetricsSnapshot {
        let time_lag_ms = Stage::ALL
            .iter()
            .map(|stage| (stage.name(), self.time_lag(*stage).as_secs_f64() * 1_000.0))
            .collect();

        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            ready: self.is_ready(),
            active_task: self.active_task().map(Stage::name),
            time_lag_ms,
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            rows_processed: self.rows_processed(),
            envelopes_retired: self.envelopes_retired(),
            decode_errors: self.decode_errors(),
            sink_retries: self.sink_retries(),
            replays: self.replays(),
            active_workers: self.active_workers(),
            queue_depth,
        }
    }
}

/// Decrements the active worker count on drop, including during unwinding
#[derive(Debug)]
pub struct WorkerGuard {
    metrics: Arc<RuntimeMetrics>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.metrics.active_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point-in-time view of [`RuntimeMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub ready: bool,
    pub active_task: Option<&'static str>,
    pub time_lag_ms: BTreeMap<&'static str, f64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rows_processed: u64,
    pub envelopes_retired: u64,
    pub decode_errors: u64,
    pub sink_retries: u64,
    pub replays: u64,
    pub active_workers: usize,
    pub queue_depth: usize,
}
