//! Error types for the live voice session.

use thiserror::Error;

use crate::audio::PcmError;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session core.
///
/// Only `Device` and `Transport` end a session. Decode failures and tool
/// handler failures are absorbed where they happen and only show up in logs.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Microphone or speaker could not be acquired.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Connection dropped, refused, or sent a frame we could not read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side sent something that violates the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A single inbound audio chunk could not be decoded.
    #[error("Audio decode error: {0}")]
    Decode(#[from] PcmError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The session is not in a state that accepts the request.
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Fatal errors end the session and need an explicit restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Transport(_) | Self::Protocol(_) | Self::Config(_))
    }

    /// Whether a caller may reasonably reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SessionError::device("no mic").is_fatal());
        assert!(!SessionError::device("no mic").is_retryable());
        assert!(SessionError::transport("reset").is_retryable());
        assert!(!SessionError::Decode(PcmError::OddLength(3)).is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let e = SessionError::transport("connection reset");
        assert_eq!(e.to_string(), "Transport error: connection reset");
    }
}
