//! # Shutdown/Signal Coordinator
//!
//! Holds the two pipeline-wide events:
//! - **shutdown**: a [`CancellationToken`] handed to every component at construction. Set by
//!   a termination signal, an unrecoverable stage error or a worker panic; never cleared.
//! - **replay**: a coalescing trigger asking the RIB-apply stage to re-emit its full state.
//!   Requests made while one is pending collapse into a single replay.
//!
//! OS signals map onto these events through [`Coordinator::spawn_signal_listener`]:
//! `SIGTERM` and `SIGINT` request shutdown, `SIGUSR1` requests a replay.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why the pipeline is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    Fatal(String),
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::Fatal(reason) => write!(f, "fatal error: {}", reason),
            ShutdownReason::Requested => f.write_str("requested"),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    shutdown: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
    replay: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Set the shutdown event; the first reason recorded wins
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        {
            let mut current = self.shared.reason.lock();
            if current.is_some() {
                return;
            }
            match &reason {
                ShutdownReason::Fatal(_) => error!("🛑 Shutting down: {}", reason),
                _ => info!("🛑 Shutting down: {}", reason),
            }
            *current = Some(reason);
        }
        self.shared.shutdown.cancel();
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shared.reason.lock().clone()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        self.shared.shutdown.cancelled().await
    }

    /// Set the replay event
    pub fn trigger_replay(&self) {
        if self.is_shutdown() {
            warn!("Replay ignored: shutdown in progress");
            return;
        }
        info!("🔁 Replay requested");
        self.shared.replay.notify_one();
    }

    /// Resolves when a replay is pending, consuming it
    pub async fn replay_requested(&self) {
        self.shared.replay.notified().await
    }

    /// Map process signals onto the coordinator's events
    ///
    /// The listener stops once shutdown is requested.
    pub fn spawn_signal_listener(&self) -> std::io::Result<JoinHandle<()>> {
        let coordinator = self.clone();
        let signals = Signals::install()?;
        Ok(tokio::spawn(async move { signals.run(coordinator).await }))
    }
}

#[cfg(unix)]
struct Signals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    replay: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            replay: signal(SignalKind::user_defined1())?,
        })
    }

    async fn run(mut self, coordinator: Coordinator) {
        loop {
            tokio::select! {
                _ = coordinator.cancelled() => return,
                _ = self.terminate.recv() => {
                    coordinator.request_shutdown(ShutdownReason::Signal("SIGTERM"));
                }
                _ = self.interrupt.recv() => {
                    coordinator.request_shutdown(ShutdownReason::Signal("SIGINT"));
                }
                _ = self.replay.recv() => coordinator.trigger_replay(),
            }
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn run(self, coordinator: Coordinator) {
        tokio::select! {
            _ = coordinator.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => coordinator.request_shutdown(ShutdownReason::Signal("Ctrl+C")),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            },
        }
    }
}
