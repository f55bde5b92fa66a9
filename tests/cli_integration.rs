//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use cloude_relay::cli::{parse_args_from, Args};
use cloude_relay::config::Config;
use cloude_relay::TunnelMode;

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("cloude-relay")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.host.is_none());
    assert!(result.port.is_none());
    assert!(!result.no_auth);
    assert!(result.config.is_none());
    assert!(result.token.is_none());
    assert!(result.tunnel_mode.is_none());
}

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-H",
        "0.0.0.0",
        "-p",
        "8080",
        "-k",
        "my-token",
        "-l",
        "debug",
        "-w",
        "/srv/projects",
        "--tunnel-mode",
        "named",
    ]))
    .unwrap();

    assert_eq!(result.host.map(|h| h.to_string()), Some("0.0.0.0".to_string()));
    assert_eq!(result.port, Some(8080));
    assert_eq!(result.token, Some("my-token".to_string()));
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert_eq!(result.working_dir, Some(PathBuf::from("/srv/projects")));
    assert_eq!(result.tunnel_mode, Some(TunnelMode::Named));
    assert!(!result.no_auth);
}

#[test]
fn test_cli_config_file() {
    let result = parse_args_from(args(&["-c", "/etc/cloude-relay.json"])).unwrap();

    assert_eq!(
        result.config.unwrap().to_str().unwrap(),
        "/etc/cloude-relay.json"
    );
}

#[test]
fn test_cli_invalid_port() {
    let result = parse_args_from(args(&["-p", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_invalid_host() {
    let result = parse_args_from(args(&["-H", "not-an-ip"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_invalid_tunnel_mode() {
    let err = parse_args_from(args(&["--tunnel-mode", "carrier-pigeon"])).unwrap_err();
    assert!(err.to_string().contains("tunnel-mode"));
}

#[test]
fn test_cli_positional_rejected() {
    assert!(parse_args_from(args(&["serve"])).is_err());
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let file = config_file(
        r#"{
        "server": {
            "host": "192.168.1.100",
            "port": 9000,
            "graceful_shutdown": false
        },
        "auth": {
            "enabled": true,
            "tokens": ["t1", "t2"]
        },
        "session": {
            "shell": "/bin/zsh",
            "template_dir": "/opt/templates"
        },
        "tunnel": {
            "mode": "named",
            "cooldown_secs": 10,
            "named": { "domain": "dev.example.com", "expose_root": true },
            "dns": { "api_token": "cf-token", "zone_id": "zone-1" }
        },
        "stream": {
            "queue_capacity": 32
        },
        "logging": {
            "level": "debug"
        }
    }"#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.server.host, "192.168.1.100");
    assert_eq!(config.server.port, 9000);
    assert!(!config.server.graceful_shutdown);
    assert!(config.auth.enabled);
    assert_eq!(config.auth.tokens.len(), 2);
    assert_eq!(config.session.shell, "/bin/zsh");
    assert_eq!(config.session.template_dir, Some(PathBuf::from("/opt/templates")));
    assert_eq!(config.tunnel.mode, TunnelMode::Named);
    assert_eq!(config.tunnel.cooldown_secs, 10);
    assert_eq!(config.tunnel.timeout_secs, 30);
    assert!(config.tunnel.named.expose_root);
    assert_eq!(config.tunnel.dns.max_retries, 3);
    assert_eq!(config.stream.queue_capacity, 32);
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_priority_cli_over_file() {
    let file = config_file(
        r#"{
        "server": {
            "host": "10.0.0.1",
            "port": 5000
        }
    }"#,
    );

    let args = Args {
        host: Some("192.168.1.1".parse().unwrap()),
        port: Some(8080),
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    assert_eq!(config.server.host, "192.168.1.1");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn test_config_file_kept_without_flags() {
    let file = config_file(r#"{"server": {"port": 5000}}"#);

    let args = Args {
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    assert_eq!(Config::load(&args).unwrap().server.port, 5000);
}

#[test]
fn test_config_token_enables_auth() {
    let args = Args {
        token: Some("secret-token".to_string()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    assert!(config.auth.enabled);
    assert!(config.auth.tokens.contains(&"secret-token".to_string()));
}

#[test]
fn test_config_no_auth_disables() {
    let file = config_file(r#"{"auth": {"enabled": true, "tokens": ["t1"]}}"#);

    let args = Args {
        config: Some(file.path().to_path_buf()),
        no_auth: true,
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    assert!(!config.auth.enabled);
}

#[test]
fn test_named_mode_requires_domain() {
    let args = Args {
        tunnel_mode: Some(TunnelMode::Named),
        ..Args::default()
    };

    assert!(Config::load(&args).is_err());
}

#[test]
fn test_config_missing_file() {
    let args = Args {
        config: Some(PathBuf::from("/nonexistent/cloude-relay.json")),
        ..Args::default()
    };

    assert!(Config::load(&args).is_err());
}

#[test]
fn test_config_to_server_config() {
    let args = Args {
        host: Some("0.0.0.0".parse().unwrap()),
        port: Some(8080),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let server_config = config.to_server_config().unwrap();

    assert_eq!(server_config.host, "0.0.0.0");
    assert_eq!(server_config.port, 8080);
    assert!(server_config.graceful_shutdown);
}

// ============================================================================
// Configuration Serialization Tests
// ============================================================================

#[test]
fn test_config_partial_deserialization() {
    let json = r#"{"server": {"port": 9999}, "tunnel": {"mode": "quick"}}"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.server.port, 9999);
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(config.server.graceful_shutdown);
    assert!(config.tunnel.auto_create);
    assert_eq!(config.session.launch_command, "claude --dangerously-skip-permissions");
}
