//! # Message Sink
//!
//! ## Purpose
//!
//! Outbound collaborators of the collector pipeline. The broker-publish stage hands every
//! change record to a [`BrokerPublisher`]; the secondary-send stage hands the raw message to
//! a [`SecondarySink`]. Implementations make one attempt per call and report failures with
//! a [`SinkError`] whose [`SinkError::is_retryable`] tells the owning stage whether to back
//! off with a [`RetryPolicy`] and try again or to escalate.
//!
//! ## Integration Points
//!
//! - **Stage workers**: call `publish` / `send`, never retire an envelope whose call failed
//! - **Binary**: builds a [`SocketPublisher`] from the broker endpoint and either a
//!   [`SocketForwarder`] or a [`DiscardSink`]
//! - **Tests**: [`test_utils::RecordingSink`] and [`test_utils::FlakySink`]

pub mod connection;
pub mod error;
pub mod retry;
pub mod sinks;
pub mod test_utils;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

pub use connection::TcpConnection;
pub use error::SinkError;
pub use retry::RetryPolicy;
pub use sinks::{decode_frame, encode_frame, DiscardSink, SocketForwarder, SocketPublisher};

/// Publishes change records to the message broker
#[async_trait]
pub trait BrokerPublisher: Send + Sync + Debug {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError>;

    /// Human-readable identity for logs
    fn name(&self) -> &str;
}

/// Receives the raw protocol message after it has been published
#[async_trait]
pub trait SecondarySink: Send + Sync + Debug {
    async fn send(&self, payload: Bytes) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}
