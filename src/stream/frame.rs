//! Structured control frames carried as text messages.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::Result;

/// Public address announced when a tunnel comes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelNotice {
    pub port: u16,
    pub public_url: String,
}

/// Control frame with a `type` discriminator.
///
/// Terminal bytes never travel in these; they use binary frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Client asks for new terminal geometry.
    Resize { cols: u16, rows: u16 },
    Ping,
    Pong,
    /// Informational line for the viewer's log pane.
    Log { content: String },
    TunnelCreated { tunnel: TunnelNotice },
    Error { message: String },
}

impl ControlFrame {
    pub fn log(content: impl Into<String>) -> Self {
        Self::Log {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn tunnel_created(port: u16, public_url: impl Into<String>) -> Self {
        Self::TunnelCreated {
            tunnel: TunnelNotice {
                port,
                public_url: public_url.into(),
            },
        }
    }

    /// Parse a frame sent by a viewer.
    ///
    /// Only `resize`, `ping` and `pong` may come from a client; anything
    /// else, including a zero-sized resize, is a protocol error.
    pub fn parse_client(text: &str) -> Result<Self> {
        let frame: ControlFrame = serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("malformed control frame: {e}")))?;

        match frame {
            Self::Resize { cols, rows } if cols == 0 || rows == 0 => Err(RelayError::Protocol(
                format!("invalid geometry {cols}x{rows}"),
            )),
            Self::Resize { .. } | Self::Ping | Self::Pong => Ok(frame),
            other => Err(RelayError::Protocol(format!(
                "{} frames are server-to-client only",
                other.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resize { .. } => "resize",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Log { .. } => "log",
            Self::TunnelCreated { .. } => "tunnel_created",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"type":"error","message":"encode failed"}"#))
    }
}
