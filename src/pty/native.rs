//! Native PTY implementation using portable-pty.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty};

use super::{LaunchSpec, PtySize};
use crate::error::RelayError;
use crate::Result;

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

/// A process running on the slave side of a fresh PTY.
///
/// The child leads its own session and process group, so its pid doubles
/// as the group id for signalling.
pub struct PtyProcess {
    pub master: Box<dyn MasterPty + Send>,
    pub child: Box<dyn Child + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub pid: u32,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Launch `spec` in a new PTY of the given size.
    ///
    /// Every failure maps to [`RelayError::Spawn`]; nothing is left running
    /// when this returns an error.
    pub fn spawn(&self, spec: &LaunchSpec, size: PtySize) -> Result<PtyProcess> {
        let pair = self
            .pty_system
            .openpty(size.into())
            .map_err(|e| RelayError::Spawn(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::Spawn(format!("{}: {e}", spec.program)))?;
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);

        let handles = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                return Err(RelayError::Spawn(e.to_string()));
            }
        };

        Ok(PtyProcess {
            master: pair.master,
            child,
            reader,
            writer,
            pid,
        })
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    #[cfg(unix)]
    fn test_spawn_command() {
        let pty = NativePty::new();
        let spec = LaunchSpec::command("/bin/sh", "exit 0", std::env::temp_dir());
        let mut process = pty.spawn(&spec, PtySize::default()).unwrap();

        assert!(process.pid > 0, "PID should be positive");
        let status = process.child.wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_spawn_missing_program() {
        let pty = NativePty::new();
        let spec = LaunchSpec::command("/nonexistent/shell", "true", std::env::temp_dir());
        let result = pty.spawn(&spec, PtySize::default());
        assert!(matches!(result, Err(RelayError::Spawn(_))));
    }

    // PTY reads block until the child writes; run with: cargo test -- --ignored
    #[test]
    #[ignore]
    #[cfg(unix)]
    fn test_output_and_geometry() {
        let pty = NativePty::new();
        let spec = LaunchSpec::command("/bin/sh", "stty size", std::env::temp_dir());
        let mut process = pty.spawn(&spec, PtySize::new(40, 120)).unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            match process.reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
            }
            if String::from_utf8_lossy(&output).contains("40 120") {
                break;
            }
        }

        assert!(String::from_utf8_lossy(&output).contains("40 120"));
    }
}
