//! Sink doubles for pipeline tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::{BrokerPublisher, SecondarySink, SinkError};

/// Records everything it receives, optionally pausing before each call completes
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(String, Bytes)>>,
    sent: Mutex<Vec<Bytes>>,
    delay: Option<Duration>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each call sleeps for `delay` before recording
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().clone()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Wait until at least `count` records were published; false on timeout
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.published_count() >= count)
            .await
    }

    /// Wait until at least `count` payloads were sent; false on timeout
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.sent_count() >= count).await
    }

    async fn wait_until(&self, timeout: Duration, done: impl Fn() -> bool) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if done() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BrokerPublisher for RecordingSink {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError> {
        self.pause().await;
        self.published.lock().push((topic.to_string(), payload));
        self.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[async_trait]
impl SecondarySink for RecordingSink {
    async fn send(&self, payload: Bytes) -> Result<(), SinkError> {
        self.pause().await;
        self.sent.lock().push(payload);
        self.notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails a configured number of calls before delegating to a [`RecordingSink`]
#[derive(Debug)]
pub struct FlakySink {
    failures_remaining: AtomicU32,
    fatal: bool,
    attempts: AtomicU64,
    inner: RecordingSink,
}

impl FlakySink {
    /// Fail the first `failures` calls with a retryable connection error
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            fatal: false,
            attempts: AtomicU64::new(0),
            inner: RecordingSink::new(),
        }
    }

    /// Fail every call with a non-retryable error
    pub fn fatal() -> Self {
        Self {
            failures_remaining: AtomicU32::new(u32::MAX),
            fatal: true,
            attempts: AtomicU64::new(0),
            inner: RecordingSink::new(),
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &RecordingSink {
        &self.inner
    }

    fn next_outcome(&self) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.fatal {
            return Err(SinkError::Rejected("permanently rejected".to_string()));
        }
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(SinkError::connection_lost("flaky", "simulated reset"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerPublisher for FlakySink {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError> {
        self.next_outcome()?;
        self.inner.publish(topic, payload).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[async_trait]
impl SecondarySink for FlakySink {
    async fn send(&self, payload: Bytes) -> Result<(), SinkError> {
        self.next_outcome()?;
        self.inner.send(payload).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
