//! Shared harness for collector pipeline tests

#![allow(dead_code)]

use bmp_collector::{Collaborators, Coordinator, Pipeline, PipelineConfig};
use bytes::Bytes;
use codec::{encode_message, end_of_rib_update, RouterIdentity};
use message_sink::test_utils::RecordingSink;
use message_sink::{BrokerPublisher, RetryPolicy, SecondarySink};
use parking_lot::Mutex;
use state_store::{MemoryStateStore, SessionState, StateStore, StoreError};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use types::{MessageKind, PeerContext, PublishedRecord};

pub const IDENTITY_HOST: &str = "route-views.test";

pub fn config() -> PipelineConfig {
    PipelineConfig {
        queue_capacity: 256,
        startup_timeout: Duration::from_secs(5),
        drain_timeout: Duration::from_secs(5),
        metrics_interval: Duration::from_millis(50),
        retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(10)),
        ..PipelineConfig::new(RouterIdentity::from_host(IDENTITY_HOST))
    }
}

pub fn peer() -> PeerContext {
    PeerContext::new(
        Ipv4Addr::new(198, 51, 100, 7).into(),
        65010,
        Ipv4Addr::new(10, 1, 1, 7),
    )
}

/// Route monitoring message whose body encodes `index`
pub fn route_monitoring(index: u32) -> Bytes {
    encode_message(
        MessageKind::RouteMonitoring,
        Some(&peer()),
        &index.to_be_bytes(),
    )
}

pub fn end_of_rib() -> Bytes {
    encode_message(MessageKind::RouteMonitoring, Some(&peer()), &end_of_rib_update())
}

/// Broker publications decoded back into records, in publish order
pub fn published_records(broker: &RecordingSink) -> Vec<PublishedRecord> {
    broker
        .published()
        .iter()
        .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
        .collect()
}

/// Store double that records every write in order
#[derive(Default)]
pub struct JournalStore {
    inner: MemoryStateStore,
    writes: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl JournalStore {
    pub fn seeded(entries: &[(&[u8], &[u8])]) -> Self {
        Self {
            inner: MemoryStateStore::with_entries(entries),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.writes.lock().clone()
    }

    pub fn writes_to(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }
}

impl StateStore for JournalStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(key, value)?;
        self.writes.lock().push((key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn write_batch(&self, entries: &[(&[u8], &[u8])]) -> Result<(), StoreError> {
        self.inner.write_batch(entries)?;
        self.writes
            .lock()
            .extend(entries.iter().map(|(k, v)| (k.to_vec(), v.to_vec())));
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub coordinator: Coordinator,
    pub session: SessionState,
}

pub async fn start(
    store: Arc<dyn StateStore>,
    publisher: Arc<dyn BrokerPublisher>,
    secondary: Arc<dyn SecondarySink>,
    config: PipelineConfig,
) -> bmp_collector::Result<Harness> {
    let session = SessionState::new(store)?;
    let coordinator = Coordinator::new();
    let pipeline = Pipeline::start(
        config,
        Collaborators::new(publisher, secondary),
        session.clone(),
        coordinator.clone(),
    )
    .await?;
    Ok(Harness {
        pipeline,
        coordinator,
        session,
    })
}

pub async fn start_recording() -> (Harness, Arc<RecordingSink>, Arc<RecordingSink>) {
    let broker = Arc::new(RecordingSink::new());
    let secondary = Arc::new(RecordingSink::new());
    let harness = start(
        Arc::new(MemoryStateStore::new()),
        broker.clone(),
        secondary.clone(),
        config(),
    )
    .await
    .unwrap();
    (harness, broker, secondary)
}

/// Poll `done` until it holds; false on timeout
pub async fn eventually(timeout: Duration, done: impl Fn() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
