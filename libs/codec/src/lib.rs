//! # BMP Protocol Codec
//!
//! ## Purpose
//!
//! The codec collaborator of the collector pipeline:
//! - Stream framing of router sessions ([`frame_length`])
//! - Message classification and per-peer header decoding ([`decode`])
//! - Construction of session control messages ([`encode_initiation`], [`encode_termination`])
//!
//! ## What This Crate Does NOT Contain
//! - BGP UPDATE parsing or per-prefix routing state (route contents stay opaque)
//! - Socket management or connection handling
//! - Pipeline scheduling
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → services/collector
//!     ↑           ↓              ↓
//! PeerContext  decode/encode   RIB-apply stage,
//! MessageKind  framing         bootstrap, ingest
//! ```

pub mod builder;
pub mod constants;
pub mod error;
pub mod parser;

pub use builder::{
    encode_initiation, encode_message, encode_termination, end_of_rib_update, RouterIdentity,
    TerminationReason,
};
pub use constants::{BMP_VERSION, COMMON_HEADER_LEN, MAX_MESSAGE_LEN, PER_PEER_HEADER_LEN};
pub use error::{DecodeError, DecodeResult};
pub use parser::{decode, frame_length, InformationTlv, ProtocolMessage};

use bytes::Bytes;

/// Codec seam used by the pipeline
///
/// The RIB-apply stage decodes inbound bytes through it and bootstrap builds the session
/// Initiation with it, so tests can substitute a codec without touching either.
pub trait ProtocolCodec: Send + Sync {
    fn decode(&self, bytes: Bytes) -> DecodeResult<ProtocolMessage>;

    fn encode_initiation(&self, identity: &RouterIdentity) -> Bytes;
}

/// BMPv3 codec
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpCodec;

impl ProtocolCodec for BmpCodec {
    fn decode(&self, bytes: Bytes) -> DecodeResult<ProtocolMessage> {
        parser::decode(bytes)
    }

    fn encode_initiation(&self, identity: &RouterIdentity) -> Bytes {
        builder::encode_initiation(identity)
    }
}
