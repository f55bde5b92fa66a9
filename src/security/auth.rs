//! Bearer-token gate.
//!
//! Tokens are issued by an external identity service; the relay only checks
//! membership. REST calls carry `Authorization: Bearer <token>`, the viewer
//! WebSocket carries `?token=<token>` because browsers cannot set headers
//! on an upgrade request.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::AuthSection;

const BEARER_PREFIX: &str = "Bearer ";

/// The set of accepted tokens.
#[derive(Debug)]
pub struct TokenGate {
    enabled: bool,
    tokens: HashSet<String>,
}

impl TokenGate {
    pub fn new(enabled: bool, tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            enabled,
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn from_config(config: &AuthSection) -> Self {
        Self::new(config.enabled, config.tokens.iter().cloned())
    }

    /// A gate that lets everything through (for development).
    pub fn disabled() -> Self {
        Self::new(false, std::iter::empty())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `token` passes the gate.
    pub fn allows(&self, token: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        match token {
            Some(token) if !token.is_empty() => self.tokens.contains(token),
            _ => false,
        }
    }

    /// Token from an `Authorization` header value.
    pub fn extract_bearer(header_value: &str) -> Option<&str> {
        header_value.strip_prefix(BEARER_PREFIX).map(str::trim)
    }
}

/// Authentication middleware for axum.
pub async fn auth_middleware(
    State(gate): State<Arc<TokenGate>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !gate.is_enabled() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(TokenGate::extract_bearer);

    if gate.allows(token) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
