use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Network or connection failure
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Error object returned by the JSON-RPC server
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The WebSocket channel terminated
    #[error("channel closed: {reason}")]
    ChannelClosed { reason: String },

    /// The caller's cancellation token fired
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    /// The server's response did not have the expected shape
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl TransportError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled { .. })
    }

    pub(crate) fn connection(source: impl std::fmt::Display) -> Self {
        TransportError::Connection {
            message: source.to_string(),
        }
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        TransportError::InvalidResponse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_classification() {
        assert!(TransportError::Cancelled {
            reason: "caller gave up".to_string(),
        }
        .is_cancellation());
        assert!(!TransportError::Rpc {
            code: -32601,
            message: "method not found".to_string(),
        }
        .is_cancellation());
    }
}
