//! BMPv3 wire constants

/// Only protocol version this codec speaks
pub const BMP_VERSION: u8 = 3;

/// Version (1) + message length (4) + message type (1)
pub const COMMON_HEADER_LEN: usize = 6;

/// Peer type (1) + flags (1) + distinguisher (8) + address (16) + AS (4) + BGP ID (4)
/// + timestamp seconds (4) + timestamp microseconds (4)
pub const PER_PEER_HEADER_LEN: usize = 42;

/// Information TLV header: type (2) + length (2)
pub const INFO_TLV_HEADER_LEN: usize = 4;

/// Upper bound on a single message; larger declared lengths are treated as corruption
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

/// Per-peer header flag: peer address is IPv6
pub const PEER_FLAG_IPV6: u8 = 0x80;

/// BGP message header: marker (16) + length (2) + type (1)
pub const BGP_HEADER_LEN: usize = 19;
pub const BGP_TYPE_UPDATE: u8 = 2;
/// UPDATE with empty withdrawn routes and empty path attributes (IPv4 End-of-RIB)
pub const BGP_END_OF_RIB_LEN: usize = BGP_HEADER_LEN + 4;

/// Initiation / Termination information TLV types
pub mod info {
    pub const STRING: u16 = 0;
    pub const SYS_DESCR: u16 = 1;
    pub const SYS_NAME: u16 = 2;
    /// Termination only: two-byte reason code
    pub const REASON: u16 = 1;
}
