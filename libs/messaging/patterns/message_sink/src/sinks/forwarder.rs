//! Raw BMP forwarding to a downstream collector

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::connection::TcpConnection;
use crate::{SecondarySink, SinkError};

#[derive(Debug)]
pub struct SocketForwarder {
    connection: TcpConnection,
    forwarded: AtomicU64,
}

impl SocketForwarder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let connection = TcpConnection::new(endpoint);
        info!("🔀 Secondary sink forwarding to {}", connection.endpoint());
        Self {
            connection,
            forwarded: AtomicU64::new(0),
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SecondarySink for SocketForwarder {
    async fn send(&self, payload: Bytes) -> Result<(), SinkError> {
        self.connection.write_all(&[payload.as_ref()]).await?;
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        self.connection.endpoint()
    }
}
