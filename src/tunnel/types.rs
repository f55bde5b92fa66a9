//! Tunnel data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tunnel strategy, fixed for the lifetime of a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// One ephemeral subprocess per port with a provider-assigned URL.
    #[default]
    Quick,
    /// One shared connector with a stable DNS alias per port.
    Named,
}

impl TunnelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Named => "named",
        }
    }
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tunnel mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tunnel mode '{}' (expected quick or named)", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for TunnelMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "named" => Ok(Self::Named),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

/// Lifecycle of a tunnel record.
///
/// ```text
/// Pending ──► Active ──► Destroyed
///    │           │
///    └─► Failed ◄┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Pending,
    Active,
    Failed,
    Destroyed,
}

/// A public route to one local port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tunnel {
    pub port: u16,
    pub mode: TunnelMode,
    pub public_url: String,
    pub state: TunnelState,
    pub created_at: DateTime<Utc>,
}

impl Tunnel {
    pub fn active(port: u16, mode: TunnelMode, public_url: impl Into<String>) -> Self {
        Self {
            port,
            mode,
            public_url: public_url.into(),
            state: TunnelState::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TunnelState::Active
    }
}
