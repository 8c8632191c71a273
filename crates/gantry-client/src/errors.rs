//! Client error types.

use std::time::Duration;

use serde_json::Value;

use crate::transport::TransportError;

/// Error returned by [`crate::GatewayClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The gateway answered the call with `ok = false`.
    #[error("gateway call `{method}` failed: {error}")]
    Rpc {
        /// The method that was called.
        method: String,
        /// Server-supplied error payload.
        error: Value,
    },

    /// No matching response arrived within the deadline.
    #[error("gateway call `{method}` timed out after {timeout:?}")]
    Timeout {
        /// The method that was called.
        method: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The connection ended while the call was outstanding, or the client
    /// has been closed.
    #[error("gateway connection closed")]
    ConnectionClosed,

    /// The connect-time handshake call failed.
    #[error("gateway handshake failed: {0}")]
    Handshake(#[source] Box<ClientError>),

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A request frame could not be serialized.
    #[error("failed to encode request frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpc_error_names_method_and_payload() {
        let err = ClientError::Rpc {
            method: "chat.send".into(),
            error: json!({"code": "RATE_LIMITED"}),
        };
        let display = err.to_string();
        assert!(display.contains("chat.send"));
        assert!(display.contains("RATE_LIMITED"));
    }

    #[test]
    fn timeout_error_names_method_and_deadline() {
        let err = ClientError::Timeout {
            method: "sessions.list".into(),
            timeout: Duration::from_secs(5),
        };
        let display = err.to_string();
        assert!(display.contains("sessions.list"));
        assert!(display.contains("5s"));
    }

    #[test]
    fn handshake_error_wraps_source() {
        let err = ClientError::Handshake(Box::new(ClientError::ConnectionClosed));
        assert!(err.to_string().contains("handshake"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn transport_error_is_transparent() {
        let err = ClientError::from(TransportError::Connect("refused".into()));
        assert!(err.to_string().contains("refused"));
    }
}
