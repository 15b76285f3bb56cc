//! Pipeline stage tags
//!
//! Every envelope names the worker role that must process it next. The four roles form a
//! fixed chain; only the final role retires envelopes.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;

/// Number of worker roles in the pipeline
pub const STAGE_COUNT: usize = 4;

/// Worker role an envelope is routed to
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Applies decoded protocol messages to per-peer routing state
    RibApply = 0,
    /// Publishes change records to the message broker
    BrokerPublish = 1,
    /// Forwards change records to the secondary sink
    SecondarySend = 2,
    /// Updates metrics, writes checkpoints and retires envelopes
    MetricsLog = 3,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageParseError {
    #[error("Invalid stage tag {0}: valid tags are 0-3")]
    InvalidTag(u8),
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::RibApply,
        Stage::BrokerPublish,
        Stage::SecondarySend,
        Stage::MetricsLog,
    ];

    /// Stage that receives envelopes after this one, `None` for the terminal stage
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::RibApply => Some(Stage::BrokerPublish),
            Stage::BrokerPublish => Some(Stage::SecondarySend),
            Stage::SecondarySend => Some(Stage::MetricsLog),
            Stage::MetricsLog => None,
        }
    }

    /// Whether envelopes are retired by this stage
    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    /// Position of the stage in [`Stage::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable name used in logs and metrics
    pub fn name(self) -> &'static str {
        match self {
            Stage::RibApply => "rib_apply",
            Stage::BrokerPublish => "broker_publish",
            Stage::SecondarySend => "secondary_send",
            Stage::MetricsLog => "metrics_log",
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = StageParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Stage::RibApply),
            1 => Ok(Stage::BrokerPublish),
            2 => Ok(Stage::SecondarySend),
            3 => Ok(Stage::MetricsLog),
            _ => Err(StageParseError::InvalidTag(value)),
        }
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
