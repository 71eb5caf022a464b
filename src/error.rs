//! Error taxonomy for the transfer core.
//!
//! Every failure surfaced to the embedding UI carries a stable code plus a
//! human-readable message; where the failing engine knows the session it is
//! attached to, the session id rides along.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BeamError>;

#[derive(Debug, Error)]
pub enum BeamError {
    /// Malformed frame, arity mismatch, unknown tag, session-id mismatch,
    /// unsupported protocol version, or a message type the current state
    /// cannot accept.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        session_id: Option<String>,
    },

    /// Same-role collision or a HELLO from the wrong party. The detecting
    /// side writes an `Error(INVALID_PARTY)` frame to the peer before
    /// failing locally.
    #[error("invalid party: {message}")]
    InvalidParty {
        message: String,
        session_id: Option<String>,
    },

    /// Chunk index out of range, empty payload, oversized payload, missing
    /// chunks at completion, or an assembled-size mismatch.
    #[error("invalid chunk: {message}")]
    InvalidChunk {
        message: String,
        session_id: Option<String>,
    },

    /// The transport reported that no frames will arrive in time.
    #[error("transport timeout: {0}")]
    Timeout(String),

    /// The transport terminated permanently.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A resume was attempted against a stored chunk set that failed the
    /// integrity rule.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The engine was cancelled by its `CancelHandle`.
    #[error("transfer cancelled")]
    Cancelled,

    /// Backing storage failed. Only fatal when raised outside a running
    /// transfer; store failures mid-transfer are logged and swallowed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl BeamError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            session_id: None,
        }
    }

    pub fn protocol_in(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            session_id: Some(session_id.into()),
        }
    }

    pub fn invalid_party(message: impl Into<String>) -> Self {
        Self::InvalidParty {
            message: message.into(),
            session_id: None,
        }
    }

    pub fn invalid_party_in(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParty {
            message: message.into(),
            session_id: Some(session_id.into()),
        }
    }

    pub fn invalid_chunk_in(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidChunk {
            message: message.into(),
            session_id: Some(session_id.into()),
        }
    }

    /// Stable machine-readable code for the embedding UI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::InvalidParty { .. } => "INVALID_PARTY",
            Self::InvalidChunk { .. } => "INVALID_CHUNK",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConnectionLost(_) => "CONNECTION_LOST",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Session the failing engine was attached to, when known.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Protocol { session_id, .. }
            | Self::InvalidParty { session_id, .. }
            | Self::InvalidChunk { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BeamError::protocol("x").code(), "PROTOCOL_ERROR");
        assert_eq!(BeamError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            BeamError::SessionExpired("stale".into()).code(),
            "SESSION_EXPIRED"
        );
    }

    #[test]
    fn session_id_travels_with_the_error() {
        let err = BeamError::protocol_in("AB12C", "bad arity");
        assert_eq!(err.session_id(), Some("AB12C"));
        assert!(BeamError::Cancelled.session_id().is_none());
    }
}
