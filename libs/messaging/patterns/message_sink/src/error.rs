use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Connection to {endpoint} lost: {reason}")]
    ConnectionLost { endpoint: String, reason: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Message too large: {size}B exceeds limit of {limit}B")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Rejected by downstream: {0}")]
    Rejected(String),

    #[error("Sink closed")]
    Closed,
}

impl SinkError {
    /// Transient failures the owning stage keeps retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SinkError::ConnectionFailed { .. }
                | SinkError::ConnectionLost { .. }
                | SinkError::Timeout(_)
        )
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SinkError::ConnectionFailed { .. } | SinkError::ConnectionLost { .. }
        )
    }

    pub fn connection_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        SinkError::ConnectionFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn connection_lost(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        SinkError::ConnectionLost {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SinkError::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SinkError::connection_lost("broker:9092", "reset by peer").is_retryable());
        assert!(SinkError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!SinkError::MessageTooLarge { size: 10, limit: 5 }.is_retryable());
        assert!(!SinkError::Rejected("unknown topic".into()).is_retryable());
        assert!(!SinkError::Closed.is_connection_error());
    }
}
