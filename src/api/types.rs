//! API request and response types.

use std::path::PathBuf;

use axum::{http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::session::{CreateOptions, LaunchMode, SessionInfo};
use crate::tunnel::Tunnel;

/// Request to create the session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    /// Project working directory; the configured default is used when absent.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Seed the working directory from the template directory.
    #[serde(default)]
    pub copy_templates: bool,
    /// Start the assistant (`true`) or a plain login shell (`false`).
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_auto_start() -> bool {
    true
}

impl Default for CreateSessionRequest {
    fn default() -> Self {
        Self {
            working_dir: None,
            copy_templates: false,
            auto_start: true,
        }
    }
}

impl CreateSessionRequest {
    pub fn into_options(self) -> CreateOptions {
        CreateOptions {
            working_dir: self.working_dir.map(PathBuf::from),
            launch: if self.auto_start {
                LaunchMode::Assistant
            } else {
                LaunchMode::Shell
            },
            copy_templates: self.copy_templates,
        }
    }
}

/// Request to type a command line into the session.
#[derive(Debug, Clone, Deserialize)]
pub struct SendCommandRequest {
    pub command: String,
}

/// Request for a manual tunnel.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTunnelRequest {
    pub port: u16,
}

/// Session status with server-side counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    #[serde(flatten)]
    pub session: SessionInfo,
    pub uptime_seconds: i64,
    pub viewers: usize,
    pub active_tunnels: usize,
}

impl SessionStatusResponse {
    pub fn new(session: SessionInfo, viewers: usize, active_tunnels: usize) -> Self {
        let uptime_seconds = (Utc::now() - session.created_at).num_seconds().max(0);
        Self {
            session,
            uptime_seconds,
            viewers,
            active_tunnels,
        }
    }
}

/// Health check body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub session_active: bool,
    pub viewers: usize,
}

/// Tunnel listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListTunnelsResponse {
    pub mode: String,
    pub count: usize,
    pub tunnels: Vec<Tunnel>,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SESSION_CONFLICT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "missing or invalid bearer token")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status and error code for a relay error.
pub fn classify(err: &RelayError) -> (StatusCode, &'static str) {
    match err {
        RelayError::Conflict(_) => (StatusCode::CONFLICT, "SESSION_CONFLICT"),
        RelayError::NoSession => (StatusCode::NOT_FOUND, "NO_SESSION"),
        RelayError::Spawn(_) => (StatusCode::UNPROCESSABLE_ENTITY, "SPAWN_FAILED"),
        RelayError::Tunnel { .. } => (StatusCode::BAD_GATEWAY, "TUNNEL_FAILED"),
        RelayError::DnsRecord(_) => (StatusCode::BAD_GATEWAY, "DNS_RECORD_FAILED"),
        RelayError::Protocol(_) => (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl From<RelayError> for ErrorResponse {
    fn from(err: RelayError) -> Self {
        let (_, code) = classify(&err);
        Self::new(code, err.to_string())
    }
}

/// Convert a relay error into its HTTP response pair.
pub fn api_error(err: RelayError) -> ApiError {
    let (status, _) = classify(&err);
    (status, Json(ErrorResponse::from(err)))
}
