//! Collector error types
//!
//! [`CollectorError`] covers everything that stops the collector before the pipeline is
//! running; all of it is startup-fatal. [`StageError`] is raised by a stage worker while
//! processing an envelope and always escalates to a pipeline shutdown. Conditions a stage
//! recovers from (decode errors, retryable sink failures) never become a `StageError`.

use collector_config::ConfigError;
use message_sink::SinkError;
use state_store::StoreError;
use std::time::Duration;
use thiserror::Error;
use types::{Sequence, Stage};

pub type Result<T> = std::result::Result<T, CollectorError>;
pub type StageResult<T> = std::result::Result<T, StageError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "Corrupted session state: started without ready (checkpoint {checkpoint}); \
         a previous run died during bootstrap, reset the state after verifying downstream consumers"
    )]
    CorruptedState { checkpoint: String },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Stage {stage} failed to start: {reason}")]
    StageStart { stage: Stage, reason: String },

    #[error("Stages did not report started within {0:?}")]
    StartupTimeout(Duration),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// Requires an operator action rather than a plain restart
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            CollectorError::CorruptedState { .. }
                | CollectorError::Store(StoreError::Corrupted { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Lane for stage {0} is closed")]
    Closed(Stage),
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} sink failed permanently: {source}")]
    Sink {
        stage: Stage,
        #[source]
        source: SinkError,
    },

    #[error("Checkpoint write failed: {0}")]
    Checkpoint(#[from] StoreError),

    #[error("Cannot encode envelope {sequence} for publishing: {reason}")]
    Encode { sequence: Sequence, reason: String },

    #[error("Hand-off from {from} failed: {source}")]
    HandOff {
        from: Stage,
        #[source]
        source: QueueError,
    },
}
