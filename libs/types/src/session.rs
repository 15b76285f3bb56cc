//! Session State Record layout
//!
//! Keys and value encodings of the lifecycle markers kept in the durable state store.

use serde::{Deserialize, Serialize};

use crate::Sequence;

/// Set before any protocol session work begins
pub const STARTED_KEY: &[u8] = b"started";
/// Set once bootstrap and every stage have confirmed a successful start
pub const READY_KEY: &[u8] = b"ready";
/// Last sequence fully retired by the terminal stage
pub const CHECKPOINT_KEY: &[u8] = b"checkpoint.sequence";

pub const FLAG_SET: &[u8] = &[0x01];
pub const FLAG_CLEAR: &[u8] = &[0x00];

/// Snapshot of the lifecycle markers for one collector lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub started: bool,
    pub ready: bool,
    /// `None` until the terminal stage has retired at least one sequenced envelope
    pub checkpoint: Option<Sequence>,
}

impl SessionRecord {
    /// A prior run crashed between marking `started` and marking `ready`
    pub fn is_corrupted(&self) -> bool {
        self.started && !self.ready
    }

    /// First sequence the RIB-apply stage may allocate in this run
    pub fn resume_sequence(&self) -> u64 {
        match self.checkpoint {
            Some(Sequence::Assigned(last)) => last + 1,
            _ => 0,
        }
    }
}

/// Decode a flag value; anything other than `0x01` reads as unset
pub fn decode_flag(value: Option<&[u8]>) -> bool {
    value == Some(FLAG_SET)
}

pub fn encode_checkpoint(sequence: i64) -> [u8; 8] {
    sequence.to_be_bytes()
}

pub fn decode_checkpoint(value: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}
