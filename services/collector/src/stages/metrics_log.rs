//! Stage 3 (terminal): account for retired envelopes, checkpoint, report metrics

use async_trait::async_trait;
use state_store::SessionState;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use types::{Envelope, Sequence, Stage};

use super::{StageContext, StageProcessor};
use crate::error::StageResult;

pub struct MetricsLogStage {
    session: SessionState,
    report_every: Duration,
    ticker: Option<Interval>,
    last_retired: Sequence,
}

impl MetricsLogStage {
    pub fn new(session: SessionState, report_every: Duration) -> Self {
        Self {
            session,
            report_every,
            ticker: None,
            last_retired: Sequence::Unassigned,
        }
    }

    fn report(&self, ctx: &StageContext) {
        let snapshot = ctx.metrics.snapshot(ctx.queue.depth());
        info!(
            retired = snapshot.envelopes_retired,
            rows = snapshot.rows_processed,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            decode_errors = snapshot.decode_errors,
            sink_retries = snapshot.sink_retries,
            queue_depth = snapshot.queue_depth,
            lag_ms = ?snapshot.time_lag_ms,
            "📊 Pipeline stats"
        );
    }
}

#[async_trait]
impl StageProcessor for MetricsLogStage {
    fn stage(&self) -> Stage {
        Stage::MetricsLog
    }

    async fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        // Fails startup if the store is unreadable rather than at the first checkpoint
        let record = self.session.read_record()?;
        debug!(checkpoint = ?record.checkpoint, "Checkpoint store readable");

        let mut ticker = interval_at(Instant::now() + self.report_every, self.report_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn process(
        &mut self,
        envelope: Envelope,
        ctx: &StageContext,
    ) -> StageResult<Vec<Envelope>> {
        if !envelope.is_control() {
            ctx.metrics.add_rows_processed(1);
            self.last_retired = envelope.sequence;
        }
        ctx.metrics.record_retired();

        if envelope.terminal && self.session.checkpoint_async(envelope.sequence).await? {
            debug!(sequence = %envelope.sequence, "💾 Checkpoint at end of unit");
        }
        Ok(Vec::new())
    }

    async fn side_event(&mut self, _ctx: &StageContext) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn on_side_event(&mut self, ctx: &StageContext) -> StageResult<Vec<Envelope>> {
        self.report(ctx);
        Ok(Vec::new())
    }

    async fn on_drain(&mut self, ctx: &StageContext) -> StageResult<()> {
        self.session.checkpoint_async(self.last_retired).await?;
        info!(
            checkpoint = %self.session.last_checkpoint(),
            "💾 Final checkpoint written"
        );
        self.report(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Coordinator;
    use crate::metrics::RuntimeMetrics;
    use crate::queue::EnvelopeQueue;
    use bytes::Bytes;
    use state_store::MemoryStateStore;
    use std::sync::Arc;
    use types::{ChangeRecord, MessageKind};

    fn retired(sequence: u64, terminal: bool) -> Envelope {
        let mut record =
            ChangeRecord::new(MessageKind::RouteMonitoring, None, Bytes::from_static(b"r"));
        if terminal {
            record = record.ending_unit();
        }
        Envelope::record(record, sequence).advance_to(Stage::MetricsLog)
    }

    fn setup() -> (MetricsLogStage, StageContext, SessionState) {
        let session = SessionState::new(Arc::new(MemoryStateStore::new())).unwrap();
        let stage = MetricsLogStage::new(session.clone(), Duration::from_secs(60));
        let ctx = StageContext {
            queue: Arc::new(EnvelopeQueue::new(8)),
            metrics: Arc::new(RuntimeMetrics::new()),
            coordinator: Coordinator::new(),
        };
        (stage, ctx, session)
    }

    #[tokio::test]
    async fn test_checkpoint_on_terminal_envelope() {
        let (mut stage, ctx, session) = setup();
        stage.on_start(&ctx).await.unwrap();

        stage.process(retired(0, false), &ctx).await.unwrap();
        assert_eq!(session.read_record().unwrap().checkpoint, None);

        stage.process(retired(1, true), &ctx).await.unwrap();
        assert_eq!(
            session.read_record().unwrap().checkpoint,
            Some(Sequence::Assigned(1))
        );
        assert_eq!(ctx.metrics.rows_processed(), 2);
        assert_eq!(ctx.metrics.envelopes_retired(), 2);
    }

    #[tokio::test]
    async fn test_drain_checkpoints_last_retired() {
        let (mut stage, ctx, session) = setup();
        stage.on_start(&ctx).await.unwrap();
        for sequence in 0..5 {
            stage.process(retired(sequence, false), &ctx).await.unwrap();
        }
        stage.on_drain(&ctx).await.unwrap();
        assert_eq!(session.last_checkpoint(), Sequence::Assigned(4));
    }

    #[tokio::test]
    async fn test_control_envelope_retired_without_row() {
        let (mut stage, ctx, session) = setup();
        let mut control = Envelope::control(Bytes::from_static(b"init"));
        control.stage = Stage::MetricsLog;

        stage.process(control, &ctx).await.unwrap();
        stage.on_drain(&ctx).await.unwrap();

        assert_eq!(ctx.metrics.rows_processed(), 0);
        assert_eq!(ctx.metrics.envelopes_retired(), 1);
        assert_eq!(session.read_record().unwrap().checkpoint, None);
    }
}
