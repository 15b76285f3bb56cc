//! # Pipeline Supervisor
//!
//! ## Purpose
//!
//! Owns the lifecycle of one collector run: bootstrap, the four stage workers, and the
//! bounded drain that ends the run.
//!
//! ## Lifecycle
//!
//! ```text
//! check session ──► mark started ──► enqueue sentinel ──► spawn workers
//!      │                                                      │
//!      ▼ corrupted                                 all report started
//!   abort, nothing enqueued                                   │
//!                                                  mark ready ▼
//!                          shutdown event ◄──────────── running
//!                                │
//!              close stage 0 ──► drain (≤ drain timeout) ──► Drained
//!                                │ timeout
//!                                └──► abort workers ──► Forced
//! ```
//!
//! A worker that exits before shutdown, by error or panic, is treated like a termination
//! signal: the run moves to drain.

use codec::{BmpCodec, ProtocolCodec, RouterIdentity};
use collector_config::CollectorConfig;
use futures::future::join_all;
use message_sink::{BrokerPublisher, RetryPolicy, SecondarySink};
use state_store::SessionState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use types::{Sequence, Stage};

use crate::bootstrap::SessionBootstrap;
use crate::control::{Coordinator, ShutdownReason};
use crate::error::{CollectorError, Result, StageResult};
use crate::metrics::RuntimeMetrics;
use crate::queue::EnvelopeQueue;
use crate::rib::{PeerTable, RibApplier};
use crate::stages::{
    BrokerPublishStage, MetricsLogStage, RibApplyStage, SecondarySendStage, StageContext,
    StageProcessor, StageWorker,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub identity: RouterIdentity,
    pub queue_capacity: usize,
    pub broker_topic: String,
    pub startup_timeout: Duration,
    pub drain_timeout: Duration,
    pub metrics_interval: Duration,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn new(identity: RouterIdentity) -> Self {
        Self {
            identity,
            queue_capacity: 10_000_000,
            broker_topic: "bmp.raw".to_string(),
            startup_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            identity: config.router_identity(),
            queue_capacity: config.queue_capacity,
            broker_topic: config.broker_topic.clone(),
            startup_timeout: config.startup_timeout(),
            drain_timeout: config.drain_timeout(),
            metrics_interval: config.metrics_interval(),
            retry: RetryPolicy::new(config.retry_base_delay(), config.retry_max_delay()),
        }
    }
}

/// External collaborators the stages delegate to
pub struct Collaborators {
    pub codec: Arc<dyn ProtocolCodec>,
    pub rib: Box<dyn RibApplier>,
    pub publisher: Arc<dyn BrokerPublisher>,
    pub secondary: Arc<dyn SecondarySink>,
}

impl Collaborators {
    /// BMP codec and pass-through peer table in front of the given sinks
    pub fn new(publisher: Arc<dyn BrokerPublisher>, secondary: Arc<dyn SecondarySink>) -> Self {
        Self {
            codec: Arc::new(BmpCodec),
            rib: Box::new(PeerTable::new()),
            publisher,
            secondary,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every worker drained within the timeout
    Drained { checkpoint: Sequence },
    /// The drain timed out and the remaining workers were cancelled
    Forced { remaining: usize },
}

impl ShutdownOutcome {
    /// Process exit status; a stopped collector never exits with success
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownOutcome::Drained { .. } => 1,
            ShutdownOutcome::Forced { .. } => 2,
        }
    }
}

type StartWait = (Stage, oneshot::Receiver<std::result::Result<(), String>>);

pub struct Pipeline {
    ctx: StageContext,
    session: SessionState,
    workers: JoinSet<StageResult<()>>,
    stages: HashMap<Id, Stage>,
    drain_timeout: Duration,
}

impl Pipeline {
    /// Bootstrap the session and start all four stages
    ///
    /// Returns once every stage reported started and the session is marked ready.
    pub async fn start(
        config: PipelineConfig,
        collaborators: Collaborators,
        session: SessionState,
        coordinator: Coordinator,
    ) -> Result<Self> {
        let Collaborators {
            codec,
            rib,
            publisher,
            secondary,
        } = collaborators;

        let bootstrap =
            SessionBootstrap::new(session.clone(), Arc::clone(&codec), config.identity.clone());
        let record = bootstrap.check()?;

        let ctx = StageContext {
            queue: Arc::new(EnvelopeQueue::new(config.queue_capacity)),
            metrics: Arc::new(RuntimeMetrics::new()),
            coordinator,
        };
        bootstrap.seed(&ctx.queue).await?;

        let mut pipeline = Self {
            ctx,
            session: session.clone(),
            workers: JoinSet::new(),
            stages: HashMap::new(),
            drain_timeout: config.drain_timeout,
        };

        let waits = vec![
            pipeline.spawn(RibApplyStage::new(codec, rib, record.resume_sequence())),
            pipeline.spawn(BrokerPublishStage::new(
                publisher,
                config.broker_topic.clone(),
                config.retry,
            )),
            pipeline.spawn(SecondarySendStage::new(secondary, config.retry)),
            pipeline.spawn(MetricsLogStage::new(session, config.metrics_interval)),
        ];

        let ready = match Self::await_started(waits, config.startup_timeout).await {
            Ok(()) => bootstrap.confirm_ready(),
            Err(e) => Err(e),
        };
        if let Err(e) = ready {
            error!("❌ Pipeline failed to start: {}", e);
            pipeline.abort(&e).await;
            return Err(e);
        }

        pipeline.ctx.metrics.set_ready(true);
        info!(
            capacity = pipeline.ctx.queue.capacity(),
            "✅ Pipeline ready: {} stages running",
            pipeline.ctx.metrics.active_workers()
        );
        Ok(pipeline)
    }

    pub fn queue(&self) -> &Arc<EnvelopeQueue> {
        &self.ctx.queue
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.ctx.metrics
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.ctx.coordinator
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Run until the shutdown event, then drain
    pub async fn run_until_shutdown(mut self) -> ShutdownOutcome {
        loop {
            tokio::select! {
                _ = self.ctx.coordinator.cancelled() => break,
                joined = self.workers.join_next_with_id() => match joined {
                    Some(joined) => {
                        let stage = report_exit(&self.stages, joined);
                        self.ctx.coordinator.request_shutdown(ShutdownReason::Fatal(format!(
                            "{} stage exited while the pipeline was running",
                            stage.map_or("unknown", Stage::name)
                        )));
                    }
                    None => break,
                },
            }
        }

        self.drain().await
    }

    async fn drain(mut self) -> ShutdownOutcome {
        self.ctx.metrics.set_ready(false);
        self.ctx.queue.close(Stage::RibApply);
        info!(
            queued = self.ctx.queue.depth(),
            timeout = ?self.drain_timeout,
            "Draining pipeline"
        );

        let stages = &self.stages;
        let workers = &mut self.workers;
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(joined) = workers.join_next_with_id().await {
                report_exit(stages, joined);
            }
        })
        .await;

        match drained {
            Ok(()) => {
                let checkpoint = self.session.last_checkpoint();
                info!(
                    checkpoint = %checkpoint,
                    retired = self.ctx.metrics.envelopes_retired(),
                    "✅ Pipeline drained"
                );
                ShutdownOutcome::Drained { checkpoint }
            }
            Err(_) => {
                let remaining = self.ctx.queue.depth();
                warn!(
                    remaining,
                    workers = self.workers.len(),
                    "⚠️ Drain timed out after {:?}, cancelling remaining stages",
                    self.drain_timeout
                );
                self.workers.shutdown().await;
                ShutdownOutcome::Forced { remaining }
            }
        }
    }

    fn spawn<P: StageProcessor>(&mut self, processor: P) -> StartWait {
        let stage = processor.stage();
        let (report, started) = oneshot::channel();
        let worker = StageWorker::new(processor, self.ctx.clone(), report);
        let handle = self.workers.spawn(worker.run());
        self.stages.insert(handle.id(), stage);
        debug!(stage = %stage, "Stage worker spawned");
        (stage, started)
    }

    async fn await_started(waits: Vec<StartWait>, timeout: Duration) -> Result<()> {
        let reports = join_all(
            waits
                .into_iter()
                .map(|(stage, started)| async move { (stage, started.await) }),
        );
        let reports = tokio::time::timeout(timeout, reports)
            .await
            .map_err(|_| CollectorError::StartupTimeout(timeout))?;

        for (stage, report) in reports {
            match report {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Err(CollectorError::StageStart { stage, reason }),
                Err(_) => {
                    return Err(CollectorError::StageStart {
                        stage,
                        reason: "worker ended before reporting".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn abort(mut self, cause: &CollectorError) {
        self.ctx
            .coordinator
            .request_shutdown(ShutdownReason::Fatal(cause.to_string()));
        self.workers.shutdown().await;
    }
}

/// Log how a worker ended and return its stage
fn report_exit(
    stages: &HashMap<Id, Stage>,
    joined: std::result::Result<(Id, StageResult<()>), JoinError>,
) -> Option<Stage> {
    match joined {
        Ok((id, Ok(()))) => {
            let stage = stages.get(&id).copied();
            debug!(stage = ?stage, "Stage worker exited");
            stage
        }
        Ok((id, Err(e))) => {
            let stage = stages.get(&id).copied();
            error!(stage = ?stage, "Stage worker failed: {}", e);
            stage
        }
        Err(e) => {
            let stage = stages.get(&e.id()).copied();
            if e.is_panic() {
                error!(stage = ?stage, "💥 Stage worker panicked");
            } else {
                debug!(stage = ?stage, "Stage worker cancelled");
            }
            stage
        }
    }
}
