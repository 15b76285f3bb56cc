//! TCP broker publisher
//!
//! Each record is written as one frame, all integers big-endian:
//!
//! ```text
//! topic_len u16 | topic | payload_len u32 | payload
//! ```

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::connection::TcpConnection;
use crate::{BrokerPublisher, SinkError};

pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

pub fn encode_frame(topic: &str, payload: &[u8]) -> Result<Bytes, SinkError> {
    let topic_len = u16::try_from(topic.len())
        .map_err(|_| SinkError::invalid_config(format!("topic of {}B is too long", topic.len())))?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| SinkError::MessageTooLarge {
        size: payload.len(),
        limit: MAX_PAYLOAD_LEN,
    })?;

    let mut buf = BytesMut::with_capacity(2 + topic.len() + 4 + payload.len());
    buf.put_u16(topic_len);
    buf.put_slice(topic.as_bytes());
    buf.put_u32(payload_len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split one frame off the front of `buf`
///
/// Returns `(topic, payload, consumed)`, or `None` while the frame is incomplete or the
/// topic is not UTF-8.
pub fn decode_frame(buf: &[u8]) -> Option<(String, Bytes, usize)> {
    let topic_len = u16::from_be_bytes([*buf.first()?, *buf.get(1)?]) as usize;
    let topic_end = 2 + topic_len;
    let topic = std::str::from_utf8(buf.get(2..topic_end)?).ok()?.to_string();

    let len_bytes = buf.get(topic_end..topic_end + 4)?;
    let payload_len =
        u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    let payload_start = topic_end + 4;
    let payload = buf.get(payload_start..payload_start + payload_len)?;

    Some((
        topic,
        Bytes::copy_from_slice(payload),
        payload_start + payload_len,
    ))
}

#[derive(Debug)]
pub struct SocketPublisher {
    connection: TcpConnection,
    published: AtomicU64,
}

impl SocketPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let connection = TcpConnection::new(endpoint);
        info!("📡 Broker publisher targeting {}", connection.endpoint());
        Self {
            connection,
            published: AtomicU64::new(0),
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerPublisher for SocketPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError> {
        let frame = encode_frame(topic, &payload)?;
        self.connection.write_all(&[frame.as_ref()]).await?;

        let total = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 10_000 == 0 {
            debug!("📨 {} records published to {}", total, self.connection.endpoint());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        self.connection.endpoint()
    }
}
