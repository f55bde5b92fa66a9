//! Quick tunnels: one provider subprocess per port, URL scraped from its output.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{TunnelBackend, TunnelMode};
use crate::config::TunnelSection;
use crate::error::RelayError;
use crate::process::terminate_child;
use crate::Result;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Spawns `cloudflared tunnel --url http://localhost:{port}` per port.
pub struct QuickBackend {
    program: String,
    args: Vec<String>,
    url_pattern: Regex,
    timeout: Duration,
    children: Mutex<HashMap<u16, Child>>,
}

impl QuickBackend {
    /// `args` may contain `{port}`, replaced with the local port on spawn.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        url_pattern: Regex,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            url_pattern,
            timeout,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(section: &TunnelSection) -> std::result::Result<Self, regex::Error> {
        Ok(Self::new(
            section.cloudflared_path.clone(),
            section.quick_args.clone(),
            Regex::new(&section.url_pattern)?,
            section.timeout(),
        ))
    }

    fn command(&self, port: u16) -> Command {
        let port = port.to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|arg| arg.replace("{port}", &port)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Read merged output until the URL pattern matches or the streams close.
    async fn scrape_url(&self, lines: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        while let Some(line) = lines.recv().await {
            debug!("cloudflared: {}", line);
            if let Some(found) = self.url_pattern.find(&line) {
                return Some(found.as_str().to_string());
            }
        }
        None
    }
}

#[async_trait]
impl TunnelBackend for QuickBackend {
    fn mode(&self) -> TunnelMode {
        TunnelMode::Quick
    }

    async fn open(&self, port: u16) -> Result<String> {
        let mut child = self
            .command(port)
            .spawn()
            .map_err(|e| RelayError::tunnel(port, format!("{}: {e}", self.program)))?;
        debug!(port, pid = ?child.id(), "quick tunnel process started");

        // The provider prints its banner on stderr; merge both streams.
        let (tx, mut lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        match tokio::time::timeout(self.timeout, self.scrape_url(&mut lines)).await {
            Ok(Some(url)) => {
                tokio::spawn(drain(port, lines));
                self.children.lock().await.insert(port, child);
                info!(port, public_url = %url, "quick tunnel established");
                Ok(url)
            }
            Ok(None) => {
                let status = child.wait().await.ok();
                Err(RelayError::tunnel(
                    port,
                    match status {
                        Some(status) => format!("tunnel process exited ({status}) before reporting a URL"),
                        None => "tunnel process exited before reporting a URL".to_string(),
                    },
                ))
            }
            Err(_) => {
                terminate_child(&mut child, STOP_GRACE).await;
                Err(RelayError::tunnel(
                    port,
                    format!("no public URL within {}s", self.timeout.as_secs()),
                ))
            }
        }
    }

    async fn close(&self, port: u16) -> Result<()> {
        let child = self.children.lock().await.remove(&port);
        if let Some(mut child) = child {
            terminate_child(&mut child, STOP_GRACE).await;
            info!(port, "quick tunnel stopped");
        }
        Ok(())
    }

    async fn is_alive(&self, port: u16) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(&port).map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!(port, %status, "quick tunnel process exited");
                false
            }
            Some(Err(e)) => {
                warn!(port, "cannot poll quick tunnel process: {}", e);
                false
            }
            None => false,
        }
    }

    async fn shutdown(&self) {
        let children: Vec<_> = self.children.lock().await.drain().collect();
        for (port, mut child) in children {
            terminate_child(&mut child, STOP_GRACE).await;
            debug!(port, "quick tunnel reaped");
        }
    }
}

pub(super) async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Keep reading after the URL so the child never blocks on a full pipe.
async fn drain(port: u16, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        debug!(port, "cloudflared: {}", line);
    }
}
