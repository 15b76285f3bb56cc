use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{SecondarySink, SinkError};

/// Accepts and drops every payload
#[derive(Debug, Default)]
pub struct DiscardSink {
    discarded: AtomicU64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SecondarySink for DiscardSink {
    async fn send(&self, _payload: Bytes) -> Result<(), SinkError> {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "discard"
    }
}
