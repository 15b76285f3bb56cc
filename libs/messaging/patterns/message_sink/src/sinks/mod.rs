//! Concrete sink implementations
//!
//! - **SocketPublisher**: broker publishing over TCP with topic framing
//! - **SocketForwarder**: raw BMP forwarding to a downstream collector
//! - **DiscardSink**: secondary sink used when no downstream is configured

pub mod discard;
pub mod forwarder;
pub mod publisher;

pub use discard::DiscardSink;
pub use forwarder::SocketForwarder;
pub use publisher::{decode_frame, encode_frame, SocketPublisher, MAX_PAYLOAD_LEN};
