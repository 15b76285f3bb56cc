//! Peer identification
//!
//! A [`PeerContext`] names the BGP peer session a message belongs to, as carried by the
//! per-peer header of peer-scoped protocol messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Kind of peer as declared by the router
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeerType {
    Global = 0,
    RdInstance = 1,
    Local = 2,
    /// Types this collector does not distinguish further
    Other = 255,
}

impl From<u8> for PeerType {
    fn from(value: u8) -> Self {
        match value {
            0 => PeerType::Global,
            1 => PeerType::RdInstance,
            2 => PeerType::Local,
            _ => PeerType::Other,
        }
    }
}

/// Identifier of the originating router peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerContext {
    pub peer_type: PeerType,
    /// Route distinguisher, zero for global peers
    pub distinguisher: u64,
    pub address: IpAddr,
    pub asn: u32,
    pub bgp_id: Ipv4Addr,
}

impl PeerContext {
    pub fn new(address: IpAddr, asn: u32, bgp_id: Ipv4Addr) -> Self {
        Self {
            peer_type: PeerType::Global,
            distinguisher: 0,
            address,
            asn,
            bgp_id,
        }
    }
}

impl fmt::Display for PeerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distinguisher == 0 {
            write!(f, "{} AS{}", self.address, self.asn)
        } else {
            write!(f, "{}:{} AS{}", self.distinguisher, self.address, self.asn)
        }
    }
}
