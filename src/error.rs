//! Error types for cloude-relay.

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A session is already running; create requests are rejected, not queued.
    #[error("session already running: {0}")]
    Conflict(String),

    /// PTY allocation, working directory preparation, or process launch failed.
    #[error("failed to spawn session: {0}")]
    Spawn(String),

    /// The operation needs a running session and there is none.
    #[error("no active session")]
    NoSession,

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    /// PTY-related error after the session was established.
    #[error("PTY error: {0}")]
    Pty(String),

    /// Tunnel subprocess or connector route failed.
    #[error("tunnel for port {port} failed: {reason}")]
    Tunnel { port: u16, reason: String },

    /// Provider DNS API call failed after exhausting retries.
    #[error("DNS record error: {0}")]
    DnsRecord(String),

    /// Malformed control frame on the streaming layer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error talking to the provider API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl RelayError {
    /// Build a [`RelayError::Tunnel`] for `port`.
    pub fn tunnel(port: u16, reason: impl std::fmt::Display) -> Self {
        Self::Tunnel {
            port,
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
