//! # BMP Message Builder
//!
//! Constructs outbound BMPv3 messages: the session Initiation sent at bootstrap, the
//! Termination sent when a session ends, and arbitrary per-peer messages used when the
//! routing table is replayed.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::IpAddr;
use types::{MessageKind, PeerContext};

use crate::constants::*;

/// Router identity announced in the Initiation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterIdentity {
    pub sys_name: String,
    pub sys_descr: String,
}

impl RouterIdentity {
    pub fn new(sys_name: impl Into<String>, sys_descr: impl Into<String>) -> Self {
        Self {
            sys_name: sys_name.into(),
            sys_descr: sys_descr.into(),
        }
    }

    /// Derive the identity from a collector host name
    ///
    /// RIPE RIS route collectors (`rrcNN`) live under `ripe.net`, everything else is
    /// treated as a RouteViews collector.
    pub fn from_host(host: &str) -> Self {
        if host.starts_with("rrc") {
            let qualified = format!("{}.ripe.net", host);
            Self::new(qualified.clone(), qualified)
        } else {
            Self::new(host, format!("{}.routeviews.org", host))
        }
    }
}

/// Termination reason codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    AdministrativelyClosed = 0,
    Unspecified = 1,
    OutOfResources = 2,
    RedundantConnection = 3,
    PermanentlyClosed = 4,
}

/// Session Initiation carrying sysDescr and sysName
pub fn encode_initiation(identity: &RouterIdentity) -> Bytes {
    let mut body = BytesMut::new();
    put_information_tlv(&mut body, info::SYS_DESCR, identity.sys_descr.as_bytes());
    put_information_tlv(&mut body, info::SYS_NAME, identity.sys_name.as_bytes());
    encode_message(MessageKind::Initiation, None, &body)
}

/// Session Termination with a reason code and optional free-form text
pub fn encode_termination(reason: TerminationReason, text: Option<&str>) -> Bytes {
    let mut body = BytesMut::new();
    if let Some(text) = text {
        put_information_tlv(&mut body, info::STRING, text.as_bytes());
    }
    put_information_tlv(&mut body, info::REASON, &(reason as u16).to_be_bytes());
    encode_message(MessageKind::Termination, None, &body)
}

/// Encode a complete message: common header, per-peer header when `peer` is given, body
pub fn encode_message(kind: MessageKind, peer: Option<&PeerContext>, body: &[u8]) -> Bytes {
    let peer_len = if peer.is_some() { PER_PEER_HEADER_LEN } else { 0 };
    let total = COMMON_HEADER_LEN + peer_len + body.len();

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(BMP_VERSION);
    buf.put_u32(total as u32);
    buf.put_u8(kind as u8);
    if let Some(peer) = peer {
        put_per_peer_header(&mut buf, peer, (0, 0));
    }
    buf.put_slice(body);
    buf.freeze()
}

/// BGP UPDATE carrying no routes, the IPv4 End-of-RIB marker
pub fn end_of_rib_update() -> Bytes {
    let mut buf = BytesMut::with_capacity(BGP_END_OF_RIB_LEN);
    buf.put_slice(&[0xFF; 16]);
    buf.put_u16(BGP_END_OF_RIB_LEN as u16);
    buf.put_u8(BGP_TYPE_UPDATE);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.freeze()
}

fn put_per_peer_header(buf: &mut BytesMut, peer: &PeerContext, timestamp: (u32, u32)) {
    let (flags, address) = match peer.address {
        IpAddr::V4(v4) => {
            let mut padded = [0u8; 16];
            padded[12..].copy_from_slice(&v4.octets());
            (0u8, padded)
        }
        IpAddr::V6(v6) => (PEER_FLAG_IPV6, v6.octets()),
    };

    buf.put_u8(peer.peer_type as u8);
    buf.put_u8(flags);
    buf.put_u64(peer.distinguisher);
    buf.put_slice(&address);
    buf.put_u32(peer.asn);
    buf.put_u32(u32::from(peer.bgp_id));
    buf.put_u32(timestamp.0);
    buf.put_u32(timestamp.1);
}

fn put_information_tlv(buf: &mut BytesMut, tlv_type: u16, value: &[u8]) {
    buf.put_u16(tlv_type);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_for_ripe_collector() {
        let identity = RouterIdentity::from_host("rrc00");
        assert_eq!(identity.sys_name, "rrc00.ripe.net");
        assert_eq!(identity.sys_descr, "rrc00.ripe.net");
    }

    #[test]
    fn test_identity_for_routeviews_collector() {
        let identity = RouterIdentity::from_host("route-views2");
        assert_eq!(identity.sys_name, "route-views2");
        assert_eq!(identity.sys_descr, "route-views2.routeviews.org");
    }

    #[test]
    fn test_initiation_header() {
        let identity = RouterIdentity::new("r1", "lab router");
        let bytes = encode_initiation(&identity);

        assert_eq!(bytes[0], BMP_VERSION);
        assert_eq!(
            u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize,
            bytes.len()
        );
        assert_eq!(bytes[5], MessageKind::Initiation as u8);
        // two TLVs: 4 + 10 ("lab router") and 4 + 2 ("r1")
        assert_eq!(bytes.len(), COMMON_HEADER_LEN + 14 + 6);
    }
}
