//! # Durable State Store
//!
//! ## Purpose
//!
//! Crash-consistent persistence for the collector's lifecycle markers. A run marks
//! `started` before any protocol work begins and `ready` once every stage confirmed its
//! start; the terminal stage advances `checkpoint.sequence` as envelopes retire. Finding
//! `started` without `ready` on the next start means the previous run died mid-bootstrap.
//!
//! ## Integration Points
//!
//! - **Bootstrap**: [`SessionState::read_record`], [`SessionState::mark_started`],
//!   [`SessionState::mark_ready`]
//! - **Metrics/log stage**: [`SessionState::checkpoint_async`]
//! - **Operator tooling**: [`SessionState::reset_lifecycle`]
//!
//! ## Backends
//!
//! - [`FileStateStore`]: CRC-protected snapshot file, atomically replaced on every write
//! - [`MemoryStateStore`]: volatile, for tests

pub mod error;
pub mod file;
pub mod session;
pub mod store;

pub use error::{Result, StoreError};
pub use file::FileStateStore;
pub use session::SessionState;
pub use store::{MemoryStateStore, StateStore};
