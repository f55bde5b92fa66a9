//! Configuration management for cloude-relay.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::tunnel::TunnelMode;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Bearer-token gate.
    pub auth: AuthSection,
    /// PTY session settings.
    pub session: SessionSection,
    /// Tunnel provider settings.
    pub tunnel: TunnelSection,
    /// Viewer streaming settings.
    pub stream: StreamSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            graceful_shutdown: true,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Enable the bearer-token gate.
    pub enabled: bool,
    /// Tokens issued by the identity service.
    pub tokens: Vec<String>,
}

/// PTY session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Parent directory for sessions created without an explicit working directory.
    pub default_working_dir: PathBuf,
    /// Shell used to launch the session command.
    pub shell: String,
    /// Command run through `shell -c` when a session auto-starts.
    pub launch_command: String,
    /// Directory holding the session record and tunnel alias map.
    pub state_dir: PathBuf,
    /// Files copied into new working directories on request.
    pub template_dir: Option<PathBuf>,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
    /// Time between SIGTERM and SIGKILL when stopping the process group.
    pub kill_grace_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_working_dir: PathBuf::from("projects"),
            shell: "/bin/bash".to_string(),
            launch_command: "claude --dangerously-skip-permissions".to_string(),
            state_dir: PathBuf::from(".cloude-relay"),
            template_dir: None,
            cols: 80,
            rows: 24,
            kill_grace_ms: 2000,
        }
    }
}

impl SessionSection {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Tunnel configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSection {
    /// Quick (ephemeral URL) or named (stable DNS alias) tunnels.
    pub mode: TunnelMode,
    /// Create tunnels automatically when output announces a local port.
    pub auto_create: bool,
    /// Bound on waiting for a quick tunnel URL, in seconds.
    pub timeout_secs: u64,
    /// Window after a successful tunnel during which triggers for the same port are ignored.
    pub cooldown_secs: u64,
    /// Path to the provider CLI.
    pub cloudflared_path: String,
    /// Quick tunnel arguments; `{port}` is replaced with the local port.
    pub quick_args: Vec<String>,
    /// Pattern locating the public URL in quick tunnel output.
    pub url_pattern: String,
    /// Named tunnel settings.
    pub named: NamedSection,
    /// Provider DNS API settings.
    pub dns: DnsSection,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            mode: TunnelMode::Quick,
            auto_create: true,
            timeout_secs: 30,
            cooldown_secs: 30,
            cloudflared_path: "cloudflared".to_string(),
            quick_args: vec![
                "tunnel".to_string(),
                "--no-autoupdate".to_string(),
                "--url".to_string(),
                "http://localhost:{port}".to_string(),
            ],
            url_pattern: r"https://[a-z0-9-]+\.trycloudflare\.com".to_string(),
            named: NamedSection::default(),
            dns: DnsSection::default(),
        }
    }
}

impl TunnelSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Named tunnel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedSection {
    /// Zone domain; each port is published as `{port}.{domain}`.
    pub domain: String,
    /// Connector name, used to look up or create the connector identity.
    pub tunnel_name: String,
    /// Connector identity; resolved through the CLI when absent.
    pub tunnel_id: Option<String>,
    /// Connector credentials; defaults to `~/.cloudflared/{id}.json`.
    pub credentials_file: Option<PathBuf>,
    /// Ingress config written for the connector; defaults to `{state_dir}/ingress.yml`.
    pub config_path: Option<PathBuf>,
    /// Connector arguments; `{config}` is replaced with the ingress config path.
    pub connector_args: Vec<String>,
    /// Route the bare domain to the relay's own port.
    pub expose_root: bool,
}

impl Default for NamedSection {
    fn default() -> Self {
        Self {
            domain: String::new(),
            tunnel_name: "cloude-relay".to_string(),
            tunnel_id: None,
            credentials_file: None,
            config_path: None,
            connector_args: vec![
                "tunnel".to_string(),
                "--no-autoupdate".to_string(),
                "--config".to_string(),
                "{config}".to_string(),
                "run".to_string(),
            ],
            expose_root: false,
        }
    }
}

/// Provider DNS API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSection {
    pub api_base: String,
    pub api_token: Option<String>,
    pub zone_id: Option<String>,
    /// Attempts per API call before giving up.
    pub max_retries: u32,
    /// Initial delay between attempts; doubles each retry.
    pub retry_backoff_ms: u64,
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            api_token: None,
            zone_id: None,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Viewer streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Outbound queue bound per viewer; a viewer that fills it is disconnected.
    pub queue_capacity: usize,
    /// Seconds without client activity before a viewer is dropped.
    pub idle_timeout_secs: u64,
    /// Upper bound on bytes merged into one binary frame.
    pub coalesce_limit: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            idle_timeout_secs: 90,
            coalesce_limit: 64 * 1024,
        }
    }
}

impl StreamSection {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("CLOUDE_RELAY_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("CLOUDE_RELAY_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(token) = var("CLOUDE_RELAY_TOKEN").filter(|t| !t.is_empty()) {
            self.auth.enabled = true;
            if !self.auth.tokens.contains(&token) {
                self.auth.tokens.push(token);
            }
        }

        if let Some(dir) = var("CLOUDE_RELAY_WORKING_DIR") {
            self.session.default_working_dir = PathBuf::from(dir);
        }

        if let Some(mode) = var("CLOUDE_RELAY_TUNNEL_MODE").and_then(|m| m.parse().ok()) {
            self.tunnel.mode = mode;
        }

        if let Some(token) = var("CLOUDFLARE_API_TOKEN") {
            self.tunnel.dns.api_token = Some(token);
        }

        if let Some(zone) = var("CLOUDFLARE_ZONE_ID") {
            self.tunnel.dns.zone_id = Some(zone);
        }

        if let Some(level) = var("CLOUDE_RELAY_LOG_LEVEL").or_else(|| var("RUST_LOG")) {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }

        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref token) = args.token {
            self.auth.enabled = true;
            if !self.auth.tokens.contains(token) {
                self.auth.tokens.push(token.clone());
            }
        }

        if args.no_auth {
            self.auth.enabled = false;
        }

        if let Some(ref dir) = args.working_dir {
            self.session.default_working_dir = dir.clone();
        }

        if let Some(mode) = args.tunnel_mode {
            self.tunnel.mode = mode;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Check cross-field requirements that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        regex::Regex::new(&self.tunnel.url_pattern)
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        if self.stream.queue_capacity == 0 {
            return Err(ConfigError::Invalid("stream.queue_capacity must be positive"));
        }

        if self.tunnel.mode == TunnelMode::Named {
            if self.tunnel.named.domain.is_empty() {
                return Err(ConfigError::Missing("tunnel.named.domain"));
            }
            if self.tunnel.dns.api_token.is_none() {
                return Err(ConfigError::Missing("tunnel.dns.api_token"));
            }
            if self.tunnel.dns.zone_id.is_none() {
                return Err(ConfigError::Missing("tunnel.dns.zone_id"));
            }
        }

        Ok(())
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Tunnel URL pattern does not compile.
    InvalidPattern(String),
    /// Required setting for the selected mode is absent.
    Missing(&'static str),
    /// Setting outside its valid range.
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidPattern(e) => write!(f, "invalid tunnel url_pattern: {}", e),
            Self::Missing(key) => write!(f, "missing required setting: {}", key),
            Self::Invalid(msg) => write!(f, "invalid setting: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
