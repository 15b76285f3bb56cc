//! # BMP Collector
//!
//! ## Purpose
//!
//! Accepts BMP sessions from routers, reconstructs per-peer routing state and republishes
//! change records to a message broker and a secondary sink, surviving restarts without
//! losing or duplicating data.
//!
//! ## Architecture
//!
//! ```text
//! routers ──TCP──► ingest ──► [lane 0] RIB apply ──► [lane 1] broker publish
//!                                                          │
//!             checkpoint ◄── [lane 3] metrics/log ◄── [lane 2] secondary send
//! ```
//!
//! - [`queue::EnvelopeQueue`]: one bounded FIFO lane per stage, capacity split across lanes
//! - [`stages`]: the four workers, one per stage, sharing a single worker loop
//! - [`bootstrap::SessionBootstrap`]: session consistency check and the control envelope
//! - [`control::Coordinator`]: shutdown and replay events, signal mapping
//! - [`metrics::RuntimeMetrics`]: lock-free counters shared by every stage
//! - [`supervisor::Pipeline`]: start, run and bounded drain of a collector run
//!
//! ## Integration Points
//!
//! - **state-store**: `started` / `ready` / `checkpoint.sequence` session keys
//! - **message-sink**: broker publisher and secondary sink behind the publish/send stages
//! - **codec**: decoding in the RIB-apply stage, the Initiation built at bootstrap
//! - **health-check**: readiness and metrics over HTTP

pub mod bootstrap;
pub mod control;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod queue;
pub mod rib;
pub mod stages;
pub mod supervisor;

pub use bootstrap::SessionBootstrap;
pub use control::{Coordinator, ShutdownReason};
pub use error::{CollectorError, QueueError, Result, StageError};
pub use health::CollectorHealth;
pub use ingest::IngestListener;
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use queue::EnvelopeQueue;
pub use rib::{PeerTable, RibApplier};
pub use supervisor::{Collaborators, Pipeline, PipelineConfig, ShutdownOutcome};

/// Exit status when the collector cannot start
pub const STARTUP_FAILURE_EXIT_CODE: u8 = 3;
