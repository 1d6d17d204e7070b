//! Error types for each layer of the channel.
//!
//! Only [`SessionError`] (negotiation, connect, authenticate) is fatal to a
//! session. [`FrameError`] and [`DecodeError`] are dropped and logged by the
//! session that hit them.

use thiserror::Error;

/// Failure to obtain a channel assignment from the broker.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),

    #[error("broker unreachable: {0}")]
    Request(#[from] reqwest::Error),

    #[error("broker returned status {status}")]
    Status { status: reqwest::StatusCode },

    #[error("malformed channel assignment: {0}")]
    Body(#[source] serde_json::Error),

    #[error("broker assigned invalid port {port}")]
    InvalidPort { port: u16 },
}

impl NegotiationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::Request(_) => "unreachable",
            Self::Status { .. } => "status",
            Self::Body(_) => "malformed_body",
            Self::InvalidPort { .. } => "invalid_port",
        }
    }
}

/// Errors raised by a [`Gateway`](crate::Gateway) implementation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("gateway not connected")]
    NotConnected,

    #[error("connection closed by peer")]
    Closed,

    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("gateway protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Auth(_) => "auth",
            Self::NotConnected => "not_connected",
            Self::Closed => "closed",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}

/// An inbound message too short to carry a frame tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: {len} bytes, need at least 2")]
    Malformed { len: usize },
}

impl FrameError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed_frame",
        }
    }
}

/// A broadcast payload that is not a well-formed log event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid log event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp out of range: {millis} ms")]
    TimestampOutOfRange { millis: i64 },
}

impl DecodeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Json(_) => "invalid_payload",
            Self::TimestampOutOfRange { .. } => "timestamp_out_of_range",
        }
    }
}

/// Fatal failure of one session attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("channel negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SessionError {
    /// Coarse category: which step of the session build failed.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Negotiation(_) => "negotiation",
            Self::Gateway(GatewayError::Connect(_)) => "connect",
            Self::Gateway(GatewayError::Auth(_)) => "auth",
            Self::Gateway(_) => "gateway",
        }
    }
}

/// Synchronous startup failure of a receiver.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build broker client: {0}")]
    Client(#[from] reqwest::Error),
}

impl ReceiverError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::Client(_) => "client",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_codes() {
        let err = SessionError::from(GatewayError::Auth("bad password".to_string()));
        assert_eq!(err.error_code(), "auth");

        let err = SessionError::from(GatewayError::Connect(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        )));
        assert_eq!(err.error_code(), "connect");

        let err = SessionError::from(NegotiationError::InvalidPort { port: 0 });
        assert_eq!(err.error_code(), "negotiation");

        let err = SessionError::from(GatewayError::Closed);
        assert_eq!(err.error_code(), "gateway");
    }

    #[test]
    fn layer_error_codes() {
        assert_eq!(NegotiationError::InvalidPort { port: 0 }.error_code(), "invalid_port");
        assert_eq!(
            NegotiationError::InvalidUrl("x".to_string()).error_code(),
            "invalid_url"
        );
        assert_eq!(GatewayError::Closed.error_code(), "closed");
        assert_eq!(
            GatewayError::Auth("no reply".to_string()).error_code(),
            "auth"
        );
        assert_eq!(FrameError::Malformed { len: 1 }.error_code(), "malformed_frame");
        assert_eq!(
            DecodeError::TimestampOutOfRange { millis: i64::MAX }.error_code(),
            "timestamp_out_of_range"
        );
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(DecodeError::from(json).error_code(), "invalid_payload");
        assert_eq!(
            ReceiverError::InvalidConfig("guid is empty".to_string()).error_code(),
            "invalid_config"
        );
    }

    #[test]
    fn frame_error_display() {
        let err = FrameError::Malformed { len: 1 };
        assert_eq!(err.to_string(), "malformed frame: 1 bytes, need at least 2");
    }
}
