//! Named tunnels: one long-lived connector, one stable DNS alias per port.
//!
//! The connector reads a JSON ingress config (JSON is valid YAML). Adding or
//! removing a port rewrites the file atomically and sends SIGHUP, so routes
//! for other ports stay up. Alias records are looked up before they are
//! created and remembered in an [`AliasStore`], so a restart reuses them.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::alias::{AliasEntry, AliasStore};
use super::dns::DnsProvider;
use super::quick::forward_lines;
use super::{TunnelBackend, TunnelMode};
use crate::config::TunnelSection;
use crate::error::RelayError;
use crate::process::{self, terminate_child, Signal};
use crate::state_file;
use crate::Result;

const STOP_GRACE: Duration = Duration::from_secs(2);
const STARTUP_CHECK: Duration = Duration::from_millis(300);
const CLI_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Connector {
    id: Option<String>,
    child: Option<Child>,
    /// port → public hostname
    routes: BTreeMap<u16, String>,
    root_exposed: bool,
}

impl Connector {
    fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!(%status, "tunnel connector exited");
                self.child = None;
                false
            }
            Some(Err(e)) => {
                warn!("cannot poll tunnel connector: {}", e);
                false
            }
            None => false,
        }
    }
}

/// Publishes ports as `https://{port}.{domain}` through a shared connector.
pub struct NamedBackend {
    program: String,
    domain: String,
    tunnel_name: String,
    configured_id: Option<String>,
    credentials_file: Option<PathBuf>,
    config_path: PathBuf,
    connector_args: Vec<String>,
    /// Relay port routed from the bare domain, when enabled.
    root_port: Option<u16>,
    dns: Arc<dyn DnsProvider>,
    aliases: AliasStore,
    /// Ports whose alias was confirmed at the provider during this run.
    confirmed: std::sync::Mutex<HashSet<u16>>,
    connector: Mutex<Connector>,
}

impl NamedBackend {
    pub fn new(
        section: &TunnelSection,
        state_dir: &Path,
        relay_port: u16,
        dns: Arc<dyn DnsProvider>,
    ) -> Self {
        let named = &section.named;
        Self {
            program: section.cloudflared_path.clone(),
            domain: named.domain.trim_matches('.').to_string(),
            tunnel_name: named.tunnel_name.clone(),
            configured_id: named.tunnel_id.clone(),
            credentials_file: named.credentials_file.clone(),
            config_path: named
                .config_path
                .clone()
                .unwrap_or_else(|| state_dir.join("ingress.yml")),
            connector_args: named.connector_args.clone(),
            root_port: named.expose_root.then_some(relay_port),
            dns,
            aliases: AliasStore::open(state_dir.join("aliases.json")),
            confirmed: std::sync::Mutex::new(HashSet::new()),
            connector: Mutex::new(Connector::default()),
        }
    }

    pub fn hostname(&self, port: u16) -> String {
        format!("{port}.{}", self.domain)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Connector identity: configured, else found by name, else created.
    async fn resolve_id(&self, connector: &mut Connector, port: u16) -> Result<String> {
        if let Some(id) = &connector.id {
            return Ok(id.clone());
        }

        let id = match &self.configured_id {
            Some(id) => id.clone(),
            None => match self.find_tunnel(port).await? {
                Some(id) => {
                    info!(tunnel_id = %id, name = %self.tunnel_name, "using existing connector");
                    id
                }
                None => {
                    let id = self.create_tunnel(port).await?;
                    info!(tunnel_id = %id, name = %self.tunnel_name, "created connector");
                    id
                }
            },
        };

        connector.id = Some(id.clone());
        Ok(id)
    }

    async fn run_cli(&self, port: u16, args: &[&str]) -> Result<String> {
        let output = tokio::time::timeout(
            CLI_TIMEOUT,
            Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| RelayError::tunnel(port, format!("`{} {}` timed out", self.program, args.join(" "))))?
        .map_err(|e| RelayError::tunnel(port, format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(RelayError::tunnel(
                port,
                format!(
                    "`{} {}` failed ({}): {}",
                    self.program,
                    args.join(" "),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn find_tunnel(&self, port: u16) -> Result<Option<String>> {
        let listing = self
            .run_cli(port, &["tunnel", "list", "--output", "json"])
            .await?;
        Ok(parse_tunnel_list(&listing, &self.tunnel_name))
    }

    async fn create_tunnel(&self, port: u16) -> Result<String> {
        let output = self
            .run_cli(port, &["tunnel", "create", &self.tunnel_name])
            .await?;
        parse_created_id(&output).ok_or_else(|| {
            RelayError::tunnel(port, "could not find the tunnel id in `tunnel create` output")
        })
    }

    fn confirmed(&self) -> std::sync::MutexGuard<'_, HashSet<u16>> {
        self.confirmed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reuse an existing alias; create one only when the provider has none.
    ///
    /// A remembered alias is checked at the provider the first time it is
    /// used in a run, so a record deleted out of band gets recreated.
    async fn ensure_alias(&self, port: u16, hostname: &str, target: &str) -> Result<()> {
        let remembered = self.aliases.get(port).filter(|e| e.hostname == hostname);
        if let Some(entry) = &remembered {
            if self.confirmed().contains(&port) {
                debug!(port, hostname, record_id = %entry.record_id, "alias known");
                return Ok(());
            }
        }

        let record = match self.dns.find_cname(hostname).await? {
            Some(record) => {
                debug!(port, hostname, record_id = %record.id, "alias found at provider");
                record
            }
            None => {
                if remembered.is_some() {
                    warn!(port, hostname, "remembered alias missing at provider");
                }
                let record = self.dns.create_cname(hostname, target).await?;
                info!(port, hostname, record_id = %record.id, "alias created");
                record
            }
        };
        self.confirmed().insert(port);

        if remembered.is_some_and(|entry| entry.record_id == record.id) {
            return Ok(());
        }

        let entry = AliasEntry {
            hostname: hostname.to_string(),
            record_id: record.id,
            created_at: Utc::now(),
        };
        if let Err(e) = self.aliases.insert(port, entry) {
            warn!(port, "failed to persist alias map: {}", e);
        }
        Ok(())
    }

    fn render_config(&self, id: &str, connector: &Connector) -> Value {
        let mut ingress = Vec::with_capacity(connector.routes.len() + 2);
        if let (true, Some(root_port)) = (connector.root_exposed, self.root_port) {
            ingress.push(json!({
                "hostname": self.domain,
                "service": format!("http://127.0.0.1:{root_port}"),
            }));
        }
        for (port, hostname) in &connector.routes {
            ingress.push(json!({
                "hostname": hostname,
                "service": format!("http://127.0.0.1:{port}"),
            }));
        }
        ingress.push(json!({ "service": "http_status:404" }));

        json!({
            "tunnel": id,
            "credentials-file": self.credentials_path(id),
            "ingress": ingress,
        })
    }

    fn credentials_path(&self, id: &str) -> PathBuf {
        self.credentials_file.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(".cloudflared")
                .join(format!("{id}.json"))
        })
    }

    /// Write the ingress config, then reload or (re)start the connector.
    async fn apply(&self, connector: &mut Connector, id: &str, port: u16) -> Result<()> {
        let config = self.render_config(id, connector);
        let bytes = serde_json::to_vec_pretty(&config)?;
        state_file::write_atomic(&self.config_path, &bytes)
            .map_err(|e| RelayError::tunnel(port, format!("writing ingress config: {e}")))?;

        if connector.is_running() {
            if let Some(pid) = connector.child.as_ref().and_then(Child::id) {
                process::signal_process(pid, Signal::Hangup);
                debug!(pid, routes = connector.routes.len(), "connector reloaded");
            }
            return Ok(());
        }

        self.start_connector(connector, port).await
    }

    async fn start_connector(&self, connector: &mut Connector, port: u16) -> Result<()> {
        let config = self.config_path.to_string_lossy().into_owned();
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.connector_args
                .iter()
                .map(|arg| arg.replace("{config}", &config)),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| RelayError::tunnel(port, format!("starting connector: {e}")))?;

        let (tx, mut lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                debug!("connector: {}", line);
            }
        });

        tokio::time::sleep(STARTUP_CHECK).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(RelayError::tunnel(
                port,
                format!("connector exited on startup ({status})"),
            ));
        }

        info!(pid = ?child.id(), config = %config, "tunnel connector started");
        connector.child = Some(child);
        Ok(())
    }
}

#[async_trait]
impl TunnelBackend for NamedBackend {
    fn mode(&self) -> TunnelMode {
        TunnelMode::Named
    }

    /// Route the bare domain to the relay itself when configured.
    async fn prepare(&self) -> Result<()> {
        let Some(root_port) = self.root_port else {
            return Ok(());
        };

        let id = {
            let mut connector = self.connector.lock().await;
            self.resolve_id(&mut connector, root_port).await?
        };

        let target = format!("{id}.cfargotunnel.com");
        if self.dns.find_cname(&self.domain).await?.is_none() {
            let record = self.dns.create_cname(&self.domain, &target).await?;
            info!(domain = %self.domain, record_id = %record.id, "root alias created");
        }

        let mut connector = self.connector.lock().await;
        connector.root_exposed = true;
        self.apply(&mut connector, &id, root_port).await?;
        info!(url = %format!("https://{}", self.domain), "relay exposed on root domain");
        Ok(())
    }

    async fn open(&self, port: u16) -> Result<String> {
        let id = {
            let mut connector = self.connector.lock().await;
            self.resolve_id(&mut connector, port).await?
        };

        let hostname = self.hostname(port);
        self.ensure_alias(port, &hostname, &format!("{id}.cfargotunnel.com"))
            .await?;

        let mut connector = self.connector.lock().await;
        connector.routes.insert(port, hostname.clone());
        if let Err(e) = self.apply(&mut connector, &id, port).await {
            connector.routes.remove(&port);
            let config = self.render_config(&id, &connector);
            if let Err(e) = serde_json::to_vec_pretty(&config)
                .map_err(RelayError::from)
                .and_then(|bytes| state_file::write_atomic(&self.config_path, &bytes))
            {
                warn!(port, "failed to restore ingress config: {}", e);
            }
            return Err(e);
        }

        info!(port, hostname = %hostname, "named route added");
        Ok(format!("https://{hostname}"))
    }

    async fn close(&self, port: u16) -> Result<()> {
        let mut connector = self.connector.lock().await;
        if connector.routes.remove(&port).is_none() {
            return Ok(());
        }
        let Some(id) = connector.id.clone() else {
            return Ok(());
        };

        let config = self.render_config(&id, &connector);
        state_file::write_json_atomic(&self.config_path, &config)?;
        if connector.is_running() {
            if let Some(pid) = connector.child.as_ref().and_then(Child::id) {
                process::signal_process(pid, Signal::Hangup);
            }
        }
        info!(port, "named route removed");
        Ok(())
    }

    async fn is_alive(&self, port: u16) -> bool {
        let mut connector = self.connector.lock().await;
        connector.routes.contains_key(&port) && connector.is_running()
    }

    async fn shutdown(&self) {
        let mut connector = self.connector.lock().await;
        connector.routes.clear();
        if let Some(mut child) = connector.child.take() {
            terminate_child(&mut child, STOP_GRACE).await;
            info!("tunnel connector stopped");
        }
    }
}

#[derive(Deserialize)]
struct ListedTunnel {
    id: String,
    name: String,
}

/// Id of the tunnel called `name` in `cloudflared tunnel list --output json`.
fn parse_tunnel_list(listing: &str, name: &str) -> Option<String> {
    let tunnels: Vec<ListedTunnel> = serde_json::from_str(listing.trim()).ok()?;
    tunnels.into_iter().find(|t| t.name == name).map(|t| t.id)
}

/// Id from `Created tunnel <name> with id <uuid>`.
fn parse_created_id(output: &str) -> Option<String> {
    let pattern = Regex::new(r"with id ([0-9a-fA-F]{8}-[0-9a-fA-F-]{27})").ok()?;
    pattern
        .captures(output)
        .map(|caps| caps[1].to_string())
}
