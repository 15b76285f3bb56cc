//! Stage 2: forward the protocol message to the secondary sink

use async_trait::async_trait;
use message_sink::{RetryPolicy, SecondarySink};
use std::sync::Arc;
use tracing::{debug, info};
use types::{Envelope, Stage};

use super::{deliver_with_retry, StageContext, StageProcessor};
use crate::error::StageResult;

pub struct SecondarySendStage {
    sink: Arc<dyn SecondarySink>,
    retry: RetryPolicy,
}

impl SecondarySendStage {
    pub fn new(sink: Arc<dyn SecondarySink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }
}

#[async_trait]
impl StageProcessor for SecondarySendStage {
    fn stage(&self) -> Stage {
        Stage::SecondarySend
    }

    async fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        info!("📡 Forwarding to {}", self.sink.name());
        Ok(())
    }

    async fn process(
        &mut self,
        envelope: Envelope,
        ctx: &StageContext,
    ) -> StageResult<Vec<Envelope>> {
        let payload = envelope.payload.bytes().clone();

        deliver_with_retry(Stage::SecondarySend, &self.retry, &ctx.metrics, || {
            self.sink.send(payload.clone())
        })
        .await?;

        debug!(sequence = %envelope.sequence, "Forwarded");
        Ok(vec![envelope.advance_to(Stage::MetricsLog)])
    }
}
