//! BMP Collector Binary
//!
//! `run` (the default) starts the supervised pipeline and exits non-zero once it stops:
//! 1 after a clean drain, 2 when the drain timed out, 3 when the collector could not start.
//! `status` and `reset-state --yes` inspect and repair the durable session record.

use anyhow::{bail, Context};
use bmp_collector::{
    CollectorError, CollectorHealth, Collaborators, Coordinator, IngestListener, Pipeline,
    PipelineConfig, ShutdownOutcome, STARTUP_FAILURE_EXIT_CODE,
};
use clap::{Parser, Subcommand};
use collector_config::CollectorConfig;
use health_check::HealthCheckServer;
use message_sink::{
    BrokerPublisher, DiscardSink, SecondarySink, SocketForwarder, SocketPublisher,
};
use state_store::{FileStateStore, SessionState};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "bmp_collector";

#[derive(Parser)]
#[command(name = "bmp_collector")]
#[command(about = "BMP collector with durable session state")]
struct Args {
    /// Optional TOML configuration file; environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the collector pipeline
    Run,
    /// Print the durable session record
    Status,
    /// Clear the started/ready flags after a corrupted-state abort
    ResetState {
        /// Confirm that downstream consumers were checked
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match CollectorConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging("INFO", args.json_logs);
            error!("❌ Failed to load configuration: {}", e);
            return ExitCode::from(STARTUP_FAILURE_EXIT_CODE);
        }
    };
    init_logging(config.log_level(), args.json_logs);

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            return match run(config).await {
                Ok(outcome) => ExitCode::from(outcome.exit_code()),
                Err(e) => {
                    report_startup_failure(&e);
                    ExitCode::from(STARTUP_FAILURE_EXIT_CODE)
                }
            }
        }
        Command::Status => status(&config),
        Command::ResetState { yes } => reset_state(&config, yes),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: CollectorConfig) -> anyhow::Result<ShutdownOutcome> {
    config.validate()?;
    info!(
        "🚀 Starting BMP collector for {} ({})",
        config.host, config.environment
    );

    let listen_addr = config.listen_addr()?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding BMP listener on {}", listen_addr))?;

    let session = open_session(&config)?;
    let coordinator = Coordinator::new();
    let _signals = coordinator
        .spawn_signal_listener()
        .context("installing signal handlers")?;

    let publisher: Arc<dyn BrokerPublisher> =
        Arc::new(SocketPublisher::new(config.collector_connect.clone()));
    let secondary: Arc<dyn SecondarySink> = match &config.sender_connect {
        Some(endpoint) => Arc::new(SocketForwarder::new(endpoint.clone())),
        None => {
            info!("No SENDER_CONNECT configured, secondary sink discards");
            Arc::new(DiscardSink::new())
        }
    };

    let pipeline = Pipeline::start(
        PipelineConfig::from_config(&config),
        Collaborators::new(publisher, secondary),
        session,
        coordinator.clone(),
    )
    .await?;

    if let Some(port) = config.health_port {
        spawn_health_server(&pipeline, &coordinator, port);
    }

    let ingest = IngestListener::new(
        listener,
        Arc::clone(pipeline.queue()),
        Arc::clone(pipeline.metrics()),
        coordinator.shutdown_token(),
    );
    tokio::spawn(ingest.run());

    let outcome = pipeline.run_until_shutdown().await;
    match outcome {
        ShutdownOutcome::Drained { checkpoint } => {
            info!("Collector stopped after a clean drain (checkpoint {})", checkpoint)
        }
        ShutdownOutcome::Forced { remaining } => warn!(
            "Collector stopped after cancelling stages ({} envelopes left queued)",
            remaining
        ),
    }
    Ok(outcome)
}

fn spawn_health_server(pipeline: &Pipeline, coordinator: &Coordinator, port: u16) {
    let source = Arc::new(CollectorHealth::new(
        SERVICE_NAME,
        Arc::clone(pipeline.metrics()),
        Arc::clone(pipeline.queue()),
    ));
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let server = match HealthCheckServer::bind(source, addr) {
        Ok(server) => server,
        Err(e) => {
            warn!("⚠️ Health server disabled: {:#}", e);
            return;
        }
    };

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = server.serve(async move { shutdown.cancelled().await }).await {
            error!("Health server failed: {:#}", e);
        }
    });
}

fn open_session(config: &CollectorConfig) -> anyhow::Result<SessionState> {
    let store = FileStateStore::open(&config.state_dir)
        .with_context(|| format!("opening session state in {:?}", config.state_dir))?;
    Ok(SessionState::new(Arc::new(store))?)
}

fn status(config: &CollectorConfig) -> anyhow::Result<()> {
    let record = open_session(config)?.read_record()?;
    let report = serde_json::json!({
        "state_dir": config.state_dir,
        "started": record.started,
        "ready": record.ready,
        "corrupted": record.is_corrupted(),
        "checkpoint": record.checkpoint.map(|sequence| sequence.to_string()),
        "resume_sequence": record.resume_sequence(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn reset_state(config: &CollectorConfig, confirmed: bool) -> anyhow::Result<()> {
    if !confirmed {
        bail!("refusing to reset session state without --yes");
    }
    let session = open_session(config)?;
    let before = session.read_record()?;
    session.reset_lifecycle()?;
    info!(
        was_corrupted = before.is_corrupted(),
        checkpoint = ?before.checkpoint,
        "Session lifecycle reset; the next run starts from the preserved checkpoint"
    );
    Ok(())
}

fn report_startup_failure(e: &anyhow::Error) {
    error!("❌ Collector failed to start: {:#}", e);
    let needs_operator = e
        .downcast_ref::<CollectorError>()
        .is_some_and(CollectorError::needs_operator);
    if needs_operator {
        error!("Operator action required: inspect with `status`, then `reset-state --yes`");
    }
}
