//! Error types for the AMI client

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors produced by the AMI client.
///
/// Transport-level failures (`Resolve`, `Connect`, `Timeout`, `Tls`, `Io`)
/// never reach a `send` caller directly; the connection retries on its own
/// and callers only observe [`AmiError::NotReady`] or
/// [`AmiError::ConnectionLost`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host name resolution failed or returned no addresses
    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// TCP connect failed
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// Operation timed out
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// An action was sent before login completed
    #[error("connection is not ready")]
    NotReady,

    /// The socket dropped while the action was awaiting its response
    #[error("connection lost before the response arrived")]
    ConnectionLost,

    /// The client was closed
    #[error("client closed")]
    Closed,

    /// Another in-flight action already uses this identifier
    #[error("action id already in flight: {action_id}")]
    DuplicateActionId { action_id: String },

    /// Malformed wire data, or an action that cannot be serialized safely
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// A line that does not split into `key: value`
    #[error("invalid header line: {header}")]
    InvalidHeader { header: String },

    /// Settings that can never produce a working connection
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The switch answered `Response: Error`
    #[error("action failed: {message}")]
    ActionFailed { message: String },
}

impl AmiError {
    /// Shorthand for [`AmiError::ProtocolError`].
    pub fn protocol_error(message: impl Into<String>) -> Self {
        AmiError::ProtocolError {
            message: message.into(),
        }
    }

    /// True for the errors the connection recovers from by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AmiError::Io(_)
                | AmiError::Resolve { .. }
                | AmiError::Connect { .. }
                | AmiError::Timeout { .. }
                | AmiError::Tls(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AmiError::NotReady.to_string(), "connection is not ready");
        assert_eq!(
            AmiError::Timeout { timeout_ms: 2000 }.to_string(),
            "timed out after 2000ms"
        );
        assert_eq!(
            AmiError::protocol_error("bad").to_string(),
            "protocol error: bad"
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(AmiError::Timeout { timeout_ms: 1 }.is_transport());
        assert!(AmiError::Resolve {
            host: "pbx".into(),
            reason: "nope".into(),
        }
        .is_transport());
        assert!(!AmiError::NotReady.is_transport());
        assert!(!AmiError::ConnectionLost.is_transport());
    }
}
