//! PTY (Pseudo-Terminal) layer.
//!
//! Wraps portable-pty to launch the session command and bridges its
//! blocking reader and writer to tokio channels.

mod async_adapter;
mod native;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter, GeometryGate};
pub use native::{NativePty, PtyProcess};

use std::path::PathBuf;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        portable_pty::PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// What to run inside the PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Terminal capabilities advertised to the child.
    fn terminal_env() -> Vec<(String, String)> {
        vec![
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("COLORTERM".to_string(), "truecolor".to_string()),
        ]
    }

    /// Run `command` through `shell -c`.
    pub fn command(shell: &str, command: &str, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: shell.to_string(),
            args: vec!["-c".to_string(), command.to_string()],
            cwd: cwd.into(),
            env: Self::terminal_env(),
        }
    }

    /// Start an interactive login shell.
    pub fn login_shell(shell: &str, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: shell.to_string(),
            args: vec!["-l".to_string()],
            cwd: cwd.into(),
            env: Self::terminal_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_size_default() {
        let size = PtySize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
    }

    #[test]
    fn test_pty_size_conversion() {
        let native: portable_pty::PtySize = PtySize::new(40, 120).into();
        assert_eq!(native.rows, 40);
        assert_eq!(native.cols, 120);
        assert_eq!(native.pixel_width, 0);
    }

    #[test]
    fn test_launch_command() {
        let spec = LaunchSpec::command("/bin/bash", "claude --dangerously-skip-permissions", "/tmp");
        assert_eq!(spec.program, "/bin/bash");
        assert_eq!(spec.args, vec!["-c", "claude --dangerously-skip-permissions"]);
        assert!(spec
            .env
            .contains(&("TERM".to_string(), "xterm-256color".to_string())));
    }

    #[test]
    fn test_login_shell() {
        let spec = LaunchSpec::login_shell("/bin/bash", "/tmp");
        assert_eq!(spec.args, vec!["-l"]);
        assert_eq!(spec.cwd, PathBuf::from("/tmp"));
    }
}
