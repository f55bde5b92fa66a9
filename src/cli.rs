//! Command-line interface for cloude-relay.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::tunnel::TunnelMode;

/// Command-line arguments.
///
/// Every setting is optional so that values from the config file and
/// environment survive unless the flag is given.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Bearer token accepted by the gate (overrides config file).
    pub token: Option<String>,
    /// Disable authentication.
    pub no_auth: bool,
    /// Parent directory for new session working directories.
    pub working_dir: Option<PathBuf>,
    /// Tunnel strategy.
    pub tunnel_mode: Option<TunnelMode>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('k') | Long("token") => {
                result.token = Some(parser.value()?.parse()?);
            }
            Long("no-auth") => {
                result.no_auth = true;
            }
            Short('w') | Long("working-dir") => {
                result.working_dir = Some(parser.value()?.parse()?);
            }
            Long("tunnel-mode") => {
                let value: String = parser.value()?.parse()?;
                result.tunnel_mode = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("tunnel-mode", value))?,
                );
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"cloude-relay {version}
PTY session relay with output-driven auto-tunnels

USAGE:
    cloude-relay [OPTIONS]

OPTIONS:
    -H, --host <ADDR>         Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>         Port to listen on [default: 8000]
    -c, --config <FILE>       Path to configuration file (JSON)
    -k, --token <TOKEN>       Bearer token accepted by the API
    -w, --working-dir <DIR>   Parent directory for session working dirs
        --tunnel-mode <MODE>  Tunnel strategy: quick or named [default: quick]
    -l, --log-level <LVL>     Log level (error, warn, info, debug, trace)
        --no-auth             Disable authentication
    -h, --help                Print help
    -V, --version             Print version

ENVIRONMENT VARIABLES:
    CLOUDE_RELAY_HOST         Host address (overrides config)
    CLOUDE_RELAY_PORT         Port number (overrides config)
    CLOUDE_RELAY_TOKEN        Bearer token (overrides config)
    CLOUDE_RELAY_WORKING_DIR  Session parent directory (overrides config)
    CLOUDE_RELAY_TUNNEL_MODE  Tunnel strategy (overrides config)
    CLOUDE_RELAY_LOG_LEVEL    Log level (overrides config)
    CLOUDFLARE_API_TOKEN      DNS API token for named tunnels
    CLOUDFLARE_ZONE_ID        DNS zone for named tunnels
    RUST_LOG                  Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:8000, quick tunnels, no auth)
    cloude-relay

    # Listen on all interfaces behind a token
    cloude-relay -H 0.0.0.0 -k my-secret-token

    # Named tunnels from a config file
    cloude-relay -c /etc/cloude-relay/config.json --tunnel-mode named
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("cloude-relay {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("cloude-relay")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(!result.no_auth);
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
    }

    #[test]
    fn test_token() {
        let result = parse_args_from(args(&["--token", "my-secret"])).unwrap();
        assert_eq!(result.token, Some("my-secret".to_string()));
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/config.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_tunnel_mode() {
        let result = parse_args_from(args(&["--tunnel-mode", "named"])).unwrap();
        assert_eq!(result.tunnel_mode, Some(TunnelMode::Named));

        assert!(parse_args_from(args(&["--tunnel-mode", "fancy"])).is_err());
    }

    #[test]
    fn test_working_dir() {
        let result = parse_args_from(args(&["-w", "/tmp/proj"])).unwrap();
        assert_eq!(result.working_dir, Some(PathBuf::from("/tmp/proj")));
    }

    #[test]
    fn test_help_and_version_flags() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--help"])).unwrap().help);
        assert!(parse_args_from(args(&["-V"])).unwrap().version);
        assert!(parse_args_from(args(&["--version"])).unwrap().version);
    }

    #[test]
    fn test_invalid_port() {
        assert!(parse_args_from(args(&["-p", "invalid"])).is_err());
    }

    #[test]
    fn test_unexpected_positional() {
        let err = parse_args_from(args(&["serve"])).unwrap_err();
        assert!(err.to_string().contains("serve"));
    }
}
