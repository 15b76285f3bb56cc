//! # Stage Workers
//!
//! ## Purpose
//!
//! The four pipeline roles share one worker loop ([`StageWorker`]) and differ only in the
//! [`StageProcessor`] plugged into it:
//!
//! | Stage | Processor | Emits |
//! |---|---|---|
//! | 0 | [`RibApplyStage`] | change records at stage 1, sequenced |
//! | 1 | [`BrokerPublishStage`] | the same envelope at stage 2 |
//! | 2 | [`SecondarySendStage`] | the same envelope at stage 3 |
//! | 3 | [`MetricsLogStage`] | nothing, the envelope is retired |
//!
//! ## Worker Loop
//!
//! 1. `on_start`, then report the outcome to the supervisor
//! 2. Dequeue from the stage's lane, or run the processor's side event (replay, metrics tick)
//! 3. Process the envelope to completion, hand the outputs to the next lane
//! 4. When the lane is closed and empty: `on_drain`, close the next lane, exit
//!
//! A processing error ends the worker and requests a pipeline shutdown. Whatever way the
//! worker ends, the next lane is closed so downstream stages drain; if it ends without
//! draining, its own lane is discarded so upstream stages stop waiting on it.

mod broker;
mod metrics_log;
mod rib_apply;
mod sender;

pub use broker::BrokerPublishStage;
pub use metrics_log::MetricsLogStage;
pub use rib_apply::RibApplyStage;
pub use sender::SecondarySendStage;

use async_trait::async_trait;
use message_sink::{RetryPolicy, SinkError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use types::{Envelope, Stage};

use crate::control::{Coordinator, ShutdownReason};
use crate::error::{StageError, StageResult};
use crate::metrics::RuntimeMetrics;
use crate::queue::EnvelopeQueue;

/// Handles shared by every stage worker
#[derive(Debug, Clone)]
pub struct StageContext {
    pub queue: Arc<EnvelopeQueue>,
    pub metrics: Arc<RuntimeMetrics>,
    pub coordinator: Coordinator,
}

/// Per-stage processing plugged into a [`StageWorker`]
#[async_trait]
pub trait StageProcessor: Send + 'static {
    fn stage(&self) -> Stage;

    async fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        Ok(())
    }

    /// Process one envelope; returned envelopes are handed to their stage's lane in order
    async fn process(&mut self, envelope: Envelope, ctx: &StageContext)
        -> StageResult<Vec<Envelope>>;

    /// Resolves when the processor has work that did not arrive through its lane
    ///
    /// Must be cancel safe. Never resolves by default.
    async fn side_event(&mut self, _ctx: &StageContext) {
        std::future::pending::<()>().await
    }

    async fn on_side_event(&mut self, _ctx: &StageContext) -> StageResult<Vec<Envelope>> {
        Ok(Vec::new())
    }

    /// Runs once the lane is closed and empty
    async fn on_drain(&mut self, _ctx: &StageContext) -> StageResult<()> {
        Ok(())
    }
}

pub type StartReport = oneshot::Sender<Result<(), String>>;

pub struct StageWorker<P> {
    processor: P,
    ctx: StageContext,
    started: Option<StartReport>,
}

impl<P: StageProcessor> StageWorker<P> {
    pub fn new(processor: P, ctx: StageContext, started: StartReport) -> Self {
        Self {
            processor,
            ctx,
            started: Some(started),
        }
    }

    pub async fn run(mut self) -> StageResult<()> {
        let stage = self.processor.stage();
        let _active = self.ctx.metrics.worker_guard();
        let mut lanes = LaneGuard {
            queue: Arc::clone(&self.ctx.queue),
            stage,
            drained: false,
        };

        let result = self.run_inner(stage).await;
        match &result {
            Ok(()) => {
                lanes.drained = true;
                info!(stage = %stage, "Stage drained");
            }
            Err(e) => {
                error!(stage = %stage, "❌ Stage failed: {}", e);
                self.ctx
                    .coordinator
                    .request_shutdown(ShutdownReason::Fatal(format!("{} stage: {}", stage, e)));
            }
        }
        result
    }

    async fn run_inner(&mut self, stage: Stage) -> StageResult<()> {
        let start = self.processor.on_start(&self.ctx).await;
        if let Some(report) = self.started.take() {
            let _ = report.send(start.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        }
        start?;
        info!(stage = %stage, "✅ Stage started");

        loop {
            let envelope = tokio::select! {
                biased;
                envelope = self.ctx.queue.dequeue(stage) => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
                () = self.processor.side_event(&self.ctx) => {
                    let outputs = self.processor.on_side_event(&self.ctx).await?;
                    hand_off(&self.ctx, stage, outputs).await?;
                    continue;
                }
            };

            self.ctx.metrics.set_active_task(stage);
            self.ctx.metrics.record_lag(stage, envelope.queue_lag());

            let outputs = self.processor.process(envelope, &self.ctx).await?;
            hand_off(&self.ctx, stage, outputs).await?;
        }

        debug!(stage = %stage, "Lane closed and empty, draining");
        self.processor.on_drain(&self.ctx).await
    }
}

async fn hand_off(ctx: &StageContext, stage: Stage, outputs: Vec<Envelope>) -> StageResult<()> {
    for envelope in outputs {
        ctx.queue
            .enqueue(envelope)
            .await
            .map_err(|source| StageError::HandOff {
                from: stage,
                source,
            })?;
    }
    Ok(())
}

/// Closes the next lane when the worker ends, and discards its own lane unless it drained
struct LaneGuard {
    queue: Arc<EnvelopeQueue>,
    stage: Stage,
    drained: bool,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        if !self.drained {
            self.queue.discard(self.stage);
        }
        if let Some(next) = self.stage.next() {
            self.queue.close(next);
        }
    }
}

/// Run a sink call until it succeeds, backing off between retryable failures
///
/// Non-retryable failures end the attempt with a [`StageError::Sink`].
pub(crate) async fn deliver_with_retry<F, Fut>(
    stage: Stage,
    policy: &RetryPolicy,
    metrics: &RuntimeMetrics,
    mut attempt_once: F,
) -> StageResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SinkError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_once().await {
            Ok(()) => {
                if attempt > 0 {
                    info!(stage = %stage, attempts = attempt + 1, "✅ Delivery succeeded after retry");
                }
                return Ok(());
            }
            Err(e) if e.is_retryable() => {
                attempt = attempt.saturating_add(1);
                let delay = policy.delay_for(attempt);
                metrics.record_sink_retry();
                warn!(
                    stage = %stage,
                    "⚠️ Delivery attempt {} failed, retrying in {:?}: {}",
                    attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => return Err(StageError::Sink { stage, source }),
        }
    }
}
