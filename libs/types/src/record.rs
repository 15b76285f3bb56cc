//! Change records emitted by the RIB-apply stage

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::TryFrom;
use std::fmt;

use crate::PeerContext;

/// Protocol message types, numbered as on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    RouteMonitoring = 0,
    StatsReport = 1,
    PeerDown = 2,
    PeerUp = 3,
    Initiation = 4,
    Termination = 5,
    RouteMirroring = 6,
}

impl MessageKind {
    /// Whether messages of this kind carry a per-peer header
    pub fn is_per_peer(self) -> bool {
        !matches!(self, MessageKind::Initiation | MessageKind::Termination)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::RouteMonitoring => "route_monitoring",
            MessageKind::StatsReport => "stats_report",
            MessageKind::PeerDown => "peer_down",
            MessageKind::PeerUp => "peer_up",
            MessageKind::Initiation => "initiation",
            MessageKind::Termination => "termination",
            MessageKind::RouteMirroring => "route_mirroring",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::RouteMonitoring),
            1 => Ok(MessageKind::StatsReport),
            2 => Ok(MessageKind::PeerDown),
            3 => Ok(MessageKind::PeerUp),
            4 => Ok(MessageKind::Initiation),
            5 => Ok(MessageKind::Termination),
            6 => Ok(MessageKind::RouteMirroring),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized change record republished to downstream consumers
///
/// `message` holds the complete encoded protocol message, so downstream consumers
/// that speak the protocol can forward it verbatim. It serializes as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: MessageKind,
    pub peer: Option<PeerContext>,
    #[serde(with = "hex_message")]
    pub message: Bytes,
    /// Closes a logical unit (end of a table dump, peer down, session termination)
    pub end_of_unit: bool,
}

impl ChangeRecord {
    pub fn new(kind: MessageKind, peer: Option<PeerContext>, message: Bytes) -> Self {
        Self {
            kind,
            peer,
            message,
            end_of_unit: false,
        }
    }

    pub fn ending_unit(mut self) -> Self {
        self.end_of_unit = true;
        self
    }
}

/// A change record as published to the broker, stamped with its session sequence
///
/// Consumers compare `sequence` against what they already hold to drop records
/// re-emitted after a restart. The session control record carries `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRecord {
    pub sequence: i64,
    #[serde(flatten)]
    pub record: ChangeRecord,
}

mod hex_message {
    use super::*;

    pub fn serialize<S: Serializer>(message: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(message))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
