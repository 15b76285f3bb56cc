//! Envelope - the unit of work circulating between pipeline stages
//!
//! An envelope is advanced by exactly one worker per visit: the worker bound to
//! `envelope.stage` either hands it to the next stage or, at the terminal stage, retires it.
//!
//! ## Sequencing
//!
//! - [`Sequence::Control`] marks the single bootstrap control envelope (`-1` when persisted)
//! - [`Sequence::Unassigned`] marks raw inbound bytes not yet applied at stage 0
//! - [`Sequence::Assigned`] values are allocated by the RIB-apply stage, strictly increasing

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::{ChangeRecord, PeerContext, Stage};

/// Position of an envelope in the session's sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sequence {
    /// Bootstrap control envelope, always the first envelope any stage observes
    Control,
    /// Inbound bytes waiting for the RIB-apply stage
    Unassigned,
    Assigned(u64),
}

impl Sequence {
    /// Persisted value of the control sentinel
    pub const CONTROL_SENTINEL: i64 = -1;

    /// Encode for persistence; `None` for unassigned sequences which are never persisted
    pub fn to_i64(self) -> Option<i64> {
        match self {
            Sequence::Control => Some(Self::CONTROL_SENTINEL),
            Sequence::Unassigned => None,
            Sequence::Assigned(value) => i64::try_from(value).ok(),
        }
    }

    /// Decode a persisted value; negative values map to the control sentinel
    pub fn from_i64(value: i64) -> Self {
        if value < 0 {
            Sequence::Control
        } else {
            Sequence::Assigned(value as u64)
        }
    }

    pub fn assigned(self) -> Option<u64> {
        match self {
            Sequence::Assigned(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Sequence::Control)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sequence::Control => write!(f, "{}", Self::CONTROL_SENTINEL),
            Sequence::Unassigned => f.write_str("unassigned"),
            Sequence::Assigned(value) => write!(f, "{}", value),
        }
    }
}

/// Envelope contents; never inspected by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Undecoded protocol bytes
    Raw(Bytes),
    /// Decoded and applied change record
    Record(ChangeRecord),
}

impl Payload {
    /// Wire bytes carried by the payload
    pub fn bytes(&self) -> &Bytes {
        match self {
            Payload::Raw(bytes) => bytes,
            Payload::Record(record) => &record.message,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn as_record(&self) -> Option<&ChangeRecord> {
        match self {
            Payload::Record(record) => Some(record),
            Payload::Raw(_) => None,
        }
    }
}

/// Unit of work flowing through the pipeline queue
#[derive(Debug, Clone)]
pub struct Envelope {
    pub payload: Payload,
    pub stage: Stage,
    /// Originating peer session, `None` for session-level control envelopes
    pub peer_context: Option<PeerContext>,
    pub sequence: Sequence,
    /// End of a logical unit; the terminal stage checkpoints on it
    pub terminal: bool,
    /// When the envelope was last handed to a stage, used for lag accounting
    pub enqueued_at: Instant,
}

impl Envelope {
    /// Bootstrap control envelope carrying the session Initiation message
    pub fn control(initiation: Bytes) -> Self {
        Self {
            payload: Payload::Raw(initiation),
            stage: Stage::RibApply,
            peer_context: None,
            sequence: Sequence::Control,
            terminal: false,
            enqueued_at: Instant::now(),
        }
    }

    /// Raw inbound protocol bytes entering at stage 0
    pub fn inbound(bytes: Bytes) -> Self {
        Self {
            payload: Payload::Raw(bytes),
            stage: Stage::RibApply,
            peer_context: None,
            sequence: Sequence::Unassigned,
            terminal: false,
            enqueued_at: Instant::now(),
        }
    }

    /// Change record leaving the RIB-apply stage with an allocated sequence
    pub fn record(record: ChangeRecord, sequence: u64) -> Self {
        Self {
            peer_context: record.peer,
            terminal: record.end_of_unit,
            payload: Payload::Record(record),
            stage: Stage::BrokerPublish,
            sequence: Sequence::Assigned(sequence),
            enqueued_at: Instant::now(),
        }
    }

    pub fn is_control(&self) -> bool {
        self.sequence.is_control()
    }

    /// Move the envelope to `stage`, restamping its queue entry time
    pub fn advance_to(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self.enqueued_at = Instant::now();
        self
    }

    /// Time spent waiting since the envelope was last handed to a stage
    pub fn queue_lag(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;

    #[test]
    fn test_control_envelope_shape() {
        let envelope = Envelope::control(Bytes::from_static(b"init"));
        assert_eq!(envelope.stage, Stage::RibApply);
        assert_eq!(envelope.sequence.to_i64(), Some(-1));
        assert!(envelope.peer_context.is_none());
        assert!(!envelope.terminal);
        assert!(envelope.is_control());
    }

    #[test]
    fn test_sequence_persistence_encoding() {
        assert_eq!(Sequence::from_i64(-1), Sequence::Control);
        assert_eq!(Sequence::from_i64(42), Sequence::Assigned(42));
        assert_eq!(Sequence::Assigned(42).to_i64(), Some(42));
        assert_eq!(Sequence::Unassigned.to_i64(), None);
    }

    #[test]
    fn test_record_envelope_inherits_unit_marker() {
        let record = ChangeRecord::new(MessageKind::Termination, None, Bytes::from_static(b"t"))
            .ending_unit();
        let envelope = Envelope::record(record, 7);
        assert_eq!(envelope.stage, Stage::BrokerPublish);
        assert_eq!(envelope.sequence, Sequence::Assigned(7));
        assert!(envelope.terminal);
        assert_eq!(envelope.payload.len(), 1);
    }
}
