//! Lazily connected TCP writer shared by the socket sinks
//!
//! A connection is opened on first write and dropped on any write failure; the next write
//! reconnects. Each call makes at most one connection attempt so the owning stage decides
//! how long to back off between attempts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::SinkError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TcpConnection {
    endpoint: String,
    connect_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
    connects: AtomicU64,
    bytes_written: AtomicU64,
}

impl TcpConnection {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            stream: Mutex::new(None),
            connects: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Write every chunk in order on one connection, connecting first when needed
    pub async fn write_all(&self, chunks: &[&[u8]]) -> Result<(), SinkError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(SinkError::Closed);
        };

        let mut written = 0u64;
        for chunk in chunks {
            if let Err(e) = stream.write_all(chunk).await {
                warn!("⚠️ Write to {} failed, dropping connection: {}", self.endpoint, e);
                *guard = None;
                return Err(SinkError::connection_lost(&self.endpoint, e));
            }
            written += chunk.len() as u64;
        }

        self.bytes_written.fetch_add(written, Ordering::Relaxed);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Number of successful connects, including reconnects
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<TcpStream, SinkError> {
        debug!("🔌 Connecting to {}", self.endpoint);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| SinkError::Timeout(self.connect_timeout))?
            .map_err(|e| SinkError::connection_failed(&self.endpoint, e))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", self.endpoint, e);
        }

        let count = self.connects.fetch_add(1, Ordering::Relaxed) + 1;
        info!("✅ Connected to {} (connect #{})", self.endpoint, count);
        Ok(stream)
    }
}
