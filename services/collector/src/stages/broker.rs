//! Stage 1: publish every change record to the message broker as a JSON
//! [`PublishedRecord`] stamped with its session sequence

use async_trait::async_trait;
use bytes::Bytes;
use message_sink::{BrokerPublisher, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, info};
use types::{Envelope, PublishedRecord, Stage};

use super::{deliver_with_retry, StageContext, StageProcessor};
use crate::error::{StageError, StageResult};

pub struct BrokerPublishStage {
    publisher: Arc<dyn BrokerPublisher>,
    topic: String,
    retry: RetryPolicy,
}

impl BrokerPublishStage {
    pub fn new(publisher: Arc<dyn BrokerPublisher>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            retry,
        }
    }
}

#[async_trait]
impl StageProcessor for BrokerPublishStage {
    fn stage(&self) -> Stage {
        Stage::BrokerPublish
    }

    async fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        info!("📡 Publishing to {} on topic '{}'", self.publisher.name(), self.topic);
        Ok(())
    }

    async fn process(
        &mut self,
        envelope: Envelope,
        ctx: &StageContext,
    ) -> StageResult<Vec<Envelope>> {
        let payload = encode_published(&envelope)?;
        let len = payload.len() as u64;

        deliver_with_retry(Stage::BrokerPublish, &self.retry, &ctx.metrics, || {
            self.publisher.publish(&self.topic, payload.clone())
        })
        .await?;

        ctx.metrics.add_bytes_sent(len);
        debug!(sequence = %envelope.sequence, bytes = len, "Published");
        Ok(vec![envelope.advance_to(Stage::SecondarySend)])
    }
}

/// JSON [`PublishedRecord`] for a sequenced change record
fn encode_published(envelope: &Envelope) -> StageResult<Bytes> {
    let encode_error = |reason: String| StageError::Encode {
        sequence: envelope.sequence,
        reason,
    };
    let record = envelope
        .payload
        .as_record()
        .ok_or_else(|| encode_error("payload is not a change record".to_string()))?;
    let sequence = envelope
        .sequence
        .to_i64()
        .ok_or_else(|| encode_error("sequence is not representable".to_string()))?;

    let published = PublishedRecord {
        sequence,
        record: record.clone(),
    };
    serde_json::to_vec(&published)
        .map(Bytes::from)
        .map_err(|e| encode_error(e.to_string()))
}
