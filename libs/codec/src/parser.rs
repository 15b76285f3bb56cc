//! # BMP Message Parser
//!
//! Classifies complete BMPv3 messages and extracts what the pipeline needs from them:
//! the message kind, the originating peer, information TLVs of session-level messages and
//! the End-of-RIB marker of route monitoring messages. Route contents are left opaque.
//!
//! ## Stream Framing
//!
//! [`frame_length`] inspects the common header of a partially received stream and reports
//! how many bytes the next message occupies, so readers can split a byte stream without
//! decoding anything else.

use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use types::{MessageKind, PeerContext, PeerType};

use crate::constants::*;
use crate::error::{DecodeError, DecodeResult};

/// Information TLV of an Initiation or Termination message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationTlv {
    pub tlv_type: u16,
    pub value: Bytes,
}

impl InformationTlv {
    pub fn as_str(&self) -> DecodeResult<&str> {
        std::str::from_utf8(&self.value).map_err(|_| DecodeError::InvalidUtf8(self.tlv_type))
    }
}

/// Decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    /// Present for every per-peer message kind
    pub peer: Option<PeerContext>,
    /// Per-peer header timestamp as (seconds, microseconds)
    pub timestamp: Option<(u32, u32)>,
    pub information: Vec<InformationTlv>,
    /// Route monitoring carrying a BGP End-of-RIB marker
    pub end_of_rib: bool,
    /// Complete encoded message including the common header
    pub raw: Bytes,
}

impl ProtocolMessage {
    /// First information TLV of the given type
    pub fn information(&self, tlv_type: u16) -> Option<&InformationTlv> {
        self.information.iter().find(|tlv| tlv.tlv_type == tlv_type)
    }

    /// Termination reason code, if this is a Termination carrying one
    pub fn termination_reason(&self) -> Option<u16> {
        if self.kind != MessageKind::Termination {
            return None;
        }
        self.information(info::REASON)
            .filter(|tlv| tlv.value.len() == 2)
            .map(|tlv| u16::from_be_bytes([tlv.value[0], tlv.value[1]]))
    }
}

/// Length of the next message at the start of `buf`
///
/// Returns `Ok(None)` while fewer than [`COMMON_HEADER_LEN`] bytes are buffered.
pub fn frame_length(buf: &[u8]) -> DecodeResult<Option<usize>> {
    if buf.len() < COMMON_HEADER_LEN {
        return Ok(None);
    }
    let (declared, _) = parse_common_header(buf)?;
    Ok(Some(declared))
}

/// Decode one complete message
pub fn decode(raw: Bytes) -> DecodeResult<ProtocolMessage> {
    if raw.len() < COMMON_HEADER_LEN {
        return Err(DecodeError::MessageTooSmall {
            need: COMMON_HEADER_LEN,
            got: raw.len(),
            context: "common header",
        });
    }

    let (declared, kind) = parse_common_header(&raw)?;
    if declared != raw.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: raw.len(),
        });
    }

    let mut message = ProtocolMessage {
        kind,
        peer: None,
        timestamp: None,
        information: Vec::new(),
        end_of_rib: false,
        raw: raw.clone(),
    };

    if kind.is_per_peer() {
        let (peer, timestamp) = parse_per_peer_header(&raw)?;
        message.peer = Some(peer);
        message.timestamp = Some(timestamp);

        if kind == MessageKind::RouteMonitoring {
            message.end_of_rib = is_end_of_rib(&raw[COMMON_HEADER_LEN + PER_PEER_HEADER_LEN..]);
        }
    } else {
        message.information = parse_information_tlvs(&raw, COMMON_HEADER_LEN)?;
    }

    Ok(message)
}

fn parse_common_header(buf: &[u8]) -> DecodeResult<(usize, MessageKind)> {
    let version = buf[0];
    if version != BMP_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let declared = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if declared > MAX_MESSAGE_LEN {
        return Err(DecodeError::MessageTooLarge(declared));
    }
    if declared < COMMON_HEADER_LEN {
        return Err(DecodeError::MessageTooSmall {
            need: COMMON_HEADER_LEN,
            got: declared,
            context: "declared length",
        });
    }

    let kind = MessageKind::try_from(buf[5]).map_err(DecodeError::UnknownMessageType)?;
    Ok((declared, kind))
}

fn parse_per_peer_header(raw: &[u8]) -> DecodeResult<(PeerContext, (u32, u32))> {
    let need = COMMON_HEADER_LEN + PER_PEER_HEADER_LEN;
    if raw.len() < need {
        return Err(DecodeError::MessageTooSmall {
            need,
            got: raw.len(),
            context: "per-peer header",
        });
    }

    let header = &raw[COMMON_HEADER_LEN..need];
    let peer_type = PeerType::from(header[0]);
    let flags = header[1];
    let distinguisher = u64::from_be_bytes(read_array(&header[2..10]));

    let address_bytes: [u8; 16] = read_array(&header[10..26]);
    let address = if flags & PEER_FLAG_IPV6 != 0 {
        IpAddr::V6(Ipv6Addr::from(address_bytes))
    } else {
        IpAddr::V4(Ipv4Addr::new(
            address_bytes[12],
            address_bytes[13],
            address_bytes[14],
            address_bytes[15],
        ))
    };

    let asn = u32::from_be_bytes(read_array(&header[26..30]));
    let bgp_id = Ipv4Addr::from(u32::from_be_bytes(read_array(&header[30..34])));
    let seconds = u32::from_be_bytes(read_array(&header[34..38]));
    let micros = u32::from_be_bytes(read_array(&header[38..42]));

    let peer = PeerContext {
        peer_type,
        distinguisher,
        address,
        asn,
        bgp_id,
    };
    Ok((peer, (seconds, micros)))
}

fn parse_information_tlvs(raw: &Bytes, start: usize) -> DecodeResult<Vec<InformationTlv>> {
    let mut tlvs = Vec::new();
    let mut offset = start;

    while offset < raw.len() {
        if raw.len() - offset < INFO_TLV_HEADER_LEN {
            return Err(DecodeError::TruncatedTlv {
                tlv_type: 0,
                offset,
                need: INFO_TLV_HEADER_LEN,
            });
        }
        let tlv_type = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
        let length = u16::from_be_bytes([raw[offset + 2], raw[offset + 3]]) as usize;
        let value_start = offset + INFO_TLV_HEADER_LEN;
        if raw.len() - value_start < length {
            return Err(DecodeError::TruncatedTlv {
                tlv_type,
                offset,
                need: INFO_TLV_HEADER_LEN + length,
            });
        }

        tlvs.push(InformationTlv {
            tlv_type,
            value: raw.slice(value_start..value_start + length),
        });
        offset = value_start + length;
    }

    Ok(tlvs)
}

/// An UPDATE with no withdrawn routes and no path attributes marks End-of-RIB (RFC 4724)
fn is_end_of_rib(bgp: &[u8]) -> bool {
    if bgp.len() != BGP_END_OF_RIB_LEN {
        return false;
    }
    let declared = u16::from_be_bytes([bgp[16], bgp[17]]) as usize;
    declared == BGP_END_OF_RIB_LEN
        && bgp[18] == BGP_TYPE_UPDATE
        && bgp[19..23].iter().all(|byte| *byte == 0)
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slice[..N]);
    out
}
