//! Decode errors for BMP message processing
//!
//! Every malformed input maps to a variant here; the decoder never panics on wire data.

use thiserror::Error;

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is too small to contain the expected structure
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: &'static str,
    },

    #[error("Unsupported protocol version {0}: only version 3 is understood")]
    UnsupportedVersion(u8),

    #[error("Unknown message type {0}: valid types are 0-6")]
    UnknownMessageType(u8),

    /// Declared length disagrees with the buffer handed to the decoder
    #[error("Length mismatch: header declares {declared} bytes, buffer has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Declared length {0} exceeds maximum message size")]
    MessageTooLarge(usize),

    /// Information TLV runs past the end of the message
    #[error("Truncated information TLV type {tlv_type} at offset {offset}: need {need} bytes")]
    TruncatedTlv {
        tlv_type: u16,
        offset: usize,
        need: usize,
    },

    #[error("Information TLV type {0} is not valid UTF-8")]
    InvalidUtf8(u16),
}
