//! # RIB Collaborator
//!
//! [`RibApplier`] is the seam between the RIB-apply stage and routing-table reconciliation.
//! The stage hands it every decoded message and publishes whatever change records it
//! returns; on a replay request it publishes [`RibApplier::snapshot`].
//!
//! [`PeerTable`] is a pass-through implementation: every message becomes one change record
//! unchanged, and the table only remembers enough per peer (its Peer Up plus the route
//! monitoring messages seen since) to re-emit the session state on replay. No per-prefix
//! diffing happens here.

use bytes::Bytes;
use codec::ProtocolMessage;
use std::collections::BTreeMap;
use tracing::debug;
use types::{ChangeRecord, MessageKind, PeerContext};

pub trait RibApplier: Send {
    /// Apply one decoded message and return the change records it produces
    fn apply(&mut self, message: &ProtocolMessage) -> Vec<ChangeRecord>;

    /// Full current state, ending with a record that closes the unit
    fn snapshot(&self) -> Vec<ChangeRecord>;
}

#[derive(Debug, Default)]
struct PeerRib {
    peer_up: Option<Bytes>,
    routes: Vec<Bytes>,
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerContext, PeerRib>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn route_count(&self, peer: &PeerContext) -> usize {
        self.peers.get(peer).map_or(0, |rib| rib.routes.len())
    }
}

impl RibApplier for PeerTable {
    fn apply(&mut self, message: &ProtocolMessage) -> Vec<ChangeRecord> {
        let record = ChangeRecord::new(message.kind, message.peer, message.raw.clone());

        let record = match (message.kind, message.peer) {
            (MessageKind::Termination, _) => {
                debug!(peers = self.peers.len(), "Session terminated, table cleared");
                self.peers.clear();
                record.ending_unit()
            }
            (MessageKind::PeerUp, Some(peer)) => {
                let rib = self.peers.entry(peer).or_default();
                rib.peer_up = Some(message.raw.clone());
                rib.routes.clear();
                record
            }
            (MessageKind::PeerDown, Some(peer)) => {
                self.peers.remove(&peer);
                record
            }
            (MessageKind::RouteMonitoring, Some(peer)) => {
                self.peers
                    .entry(peer)
                    .or_default()
                    .routes
                    .push(message.raw.clone());
                if message.end_of_rib {
                    record.ending_unit()
                } else {
                    record
                }
            }
            _ => record,
        };

        vec![record]
    }

    fn snapshot(&self) -> Vec<ChangeRecord> {
        let mut records = Vec::new();
        for (peer, rib) in &self.peers {
            if let Some(peer_up) = &rib.peer_up {
                records.push(ChangeRecord::new(
                    MessageKind::PeerUp,
                    Some(*peer),
                    peer_up.clone(),
                ));
            }
            records.extend(rib.routes.iter().map(|route| {
                ChangeRecord::new(MessageKind::RouteMonitoring, Some(*peer), route.clone())
            }));
        }

        if let Some(last) = records.pop() {
            records.push(last.ending_unit());
        }
        records
    }
}
