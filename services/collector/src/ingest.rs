//! # Session Ingest
//!
//! Accepts BMP sessions from routers over TCP and feeds each complete message into the
//! pipeline as a stage-0 envelope.
//!
//! Framing only reads the common header ([`codec::frame_length`]); decoding happens in the
//! RIB-apply stage. A stream whose header cannot be framed has lost synchronisation and
//! the session is closed. Sessions end quietly once stage-0 admission is closed.

use bytes::BytesMut;
use codec::frame_length;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use types::Envelope;

use crate::error::{QueueError, Result};
use crate::metrics::RuntimeMetrics;
use crate::queue::EnvelopeQueue;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct IngestListener {
    listener: TcpListener,
    queue: Arc<EnvelopeQueue>,
    metrics: Arc<RuntimeMetrics>,
    shutdown: CancellationToken,
}

impl IngestListener {
    pub fn new(
        listener: TcpListener,
        queue: Arc<EnvelopeQueue>,
        metrics: Arc<RuntimeMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            queue,
            metrics,
            shutdown,
        }
    }

    pub async fn bind(
        addr: SocketAddr,
        queue: Arc<EnvelopeQueue>,
        metrics: Arc<RuntimeMetrics>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, queue, metrics, shutdown))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept sessions until shutdown, then wait for open sessions to finish
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("✅ Accepting BMP sessions on {}", addr),
            Err(e) => warn!("Listener address unavailable: {}", e),
        }
        let sessions = TaskTracker::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, router)) => {
                        info!("🔌 Router session from {}", router);
                        let session = RouterSession {
                            router,
                            queue: Arc::clone(&self.queue),
                            metrics: Arc::clone(&self.metrics),
                            shutdown: self.shutdown.clone(),
                        };
                        sessions.spawn(session.run(stream));
                    }
                    Err(e) => error!("Failed to accept router session: {}", e),
                },
            }
        }

        sessions.close();
        debug!(open = sessions.len(), "Listener stopped, waiting for sessions");
        sessions.wait().await;
        info!("BMP listener closed");
    }
}

struct RouterSession {
    router: SocketAddr,
    queue: Arc<EnvelopeQueue>,
    metrics: Arc<RuntimeMetrics>,
    shutdown: CancellationToken,
}

impl RouterSession {
    async fn run(self, mut stream: TcpStream) {
        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut messages = 0u64;

        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = stream.read_buf(&mut buffer) => read,
            };
            match read {
                Ok(0) => {
                    if !buffer.is_empty() {
                        warn!(router = %self.router, pending = buffer.len(), "Session closed mid-message");
                    }
                    break;
                }
                Ok(n) => self.metrics.add_bytes_received(n as u64),
                Err(e) => {
                    warn!(router = %self.router, "Session read failed: {}", e);
                    break;
                }
            }

            match self.forward_frames(&mut buffer).await {
                Ok(count) => messages += count,
                Err(FrameError::Desync(reason)) => {
                    self.metrics.record_decode_error();
                    warn!(router = %self.router, "Closing unsynchronised session: {}", reason);
                    break;
                }
                Err(FrameError::Closed(_)) => {
                    debug!(router = %self.router, "Stage 0 closed, ending session");
                    break;
                }
            }
        }

        info!(router = %self.router, messages, "Router session ended");
    }

    /// Enqueue every complete message in `buffer`, leaving a partial one in place
    async fn forward_frames(&self, buffer: &mut BytesMut) -> std::result::Result<u64, FrameError> {
        let mut count = 0;
        loop {
            let needed = match frame_length(buffer) {
                Ok(Some(len)) => len,
                Ok(None) => return Ok(count),
                Err(e) => return Err(FrameError::Desync(e.to_string())),
            };
            if buffer.len() < needed {
                buffer.reserve(needed - buffer.len());
                return Ok(count);
            }

            let frame = buffer.split_to(needed).freeze();
            self.queue
                .enqueue(Envelope::inbound(frame))
                .await
                .map_err(FrameError::Closed)?;
            count += 1;
        }
    }
}

enum FrameError {
    Desync(String),
    Closed(QueueError),
}
