//! # BMP Collector Shared Types
//!
//! Type definitions shared by every crate of the collector workspace.
//!
//! ## Design Philosophy
//!
//! - **Typed Stage Tags**: pipeline roles are a closed enum, never bare integers
//! - **Explicit Sequencing**: the control sentinel and unassigned sequences are distinct variants
//! - **Opaque Payloads**: the queue never inspects what an envelope carries
//! - **No I/O**: this crate performs no parsing, networking or persistence
//!
//! ## Quick Start
//!
//! ```rust
//! use bytes::Bytes;
//! use types::{Envelope, Sequence, Stage};
//!
//! // Raw bytes read from a router session enter the pipeline at stage 0
//! let inbound = Envelope::inbound(Bytes::from_static(&[3, 0, 0, 0, 6, 4]));
//! assert_eq!(inbound.stage, Stage::RibApply);
//! assert_eq!(inbound.sequence, Sequence::Unassigned);
//! ```
//!
//! ## Integration Points
//!
//! - **codec**: produces [`PeerContext`] and [`MessageKind`] while decoding
//! - **state-store**: persists [`Sequence`] checkpoints using the [`session`] keys
//! - **bmp-collector**: moves [`Envelope`]s between stage workers

pub mod envelope;
pub mod peer;
pub mod record;
pub mod session;
pub mod stage;

pub use envelope::{Envelope, Payload, Sequence};
pub use peer::{PeerContext, PeerType};
pub use record::{ChangeRecord, MessageKind, PublishedRecord};
pub use session::SessionRecord;
pub use stage::{Stage, StageParseError, STAGE_COUNT};
