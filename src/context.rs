//! Top-level server context: the one place every component is wired.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::detect::{default_rules, PatternRule};
use crate::error::RelayError;
use crate::orchestrator::Orchestrator;
use crate::security::TokenGate;
use crate::session::{RecoveryOutcome, SessionDetection, SessionManager};
use crate::stream::ViewerHub;
use crate::tunnel::{TunnelBackend, TunnelManager};
use crate::Result;

/// Shared handles passed to every request handler.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub tunnels: Arc<TunnelManager>,
    pub hub: Arc<ViewerHub>,
    pub gate: Arc<TokenGate>,
    orchestrator: Arc<Orchestrator>,
    detections: Arc<Mutex<Option<mpsc::UnboundedReceiver<SessionDetection>>>>,
}

impl ServerContext {
    /// Wire components for `config`, with the tunnel backend it selects.
    pub fn build(config: Config) -> Result<Self> {
        let tunnels = TunnelManager::from_config(&config)?;
        Self::assemble(config, tunnels)
    }

    /// Wire components around a caller-supplied tunnel backend.
    pub fn with_backend(config: Config, backend: Arc<dyn TunnelBackend>) -> Result<Self> {
        Self::assemble(config, TunnelManager::new(backend))
    }

    fn assemble(config: Config, tunnels: TunnelManager) -> Result<Self> {
        let rules: Arc<[PatternRule]> = default_rules()
            .map_err(|e| RelayError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?
            .into();

        let hub = Arc::new(ViewerHub::new(config.stream.queue_capacity));
        let tunnels = Arc::new(tunnels);
        let (tx, rx) = mpsc::unbounded_channel();
        let sessions = SessionManager::new(config.session.clone(), rules, Arc::clone(&hub), tx);
        let orchestrator = Orchestrator::new(
            Arc::clone(&tunnels),
            Arc::clone(&hub),
            sessions.subscribe(),
            &config.tunnel,
        );
        let gate = Arc::new(TokenGate::from_config(&config.auth));

        Ok(Self {
            config: Arc::new(config),
            sessions,
            tunnels,
            hub,
            gate,
            orchestrator,
            detections: Arc::new(Mutex::new(Some(rx))),
        })
    }

    /// Start-up work: recover a previous run, prepare tunnels, start the orchestrator.
    pub async fn start(&self) {
        match self.sessions.recover_on_start() {
            RecoveryOutcome::NoRecord => {}
            RecoveryOutcome::Stale(id) => info!(session_id = %id, "discarded stale session record"),
            RecoveryOutcome::ReapedOrphan(id) => {
                warn!(session_id = %id, "stopped orphaned session from a previous run")
            }
        }

        if let Err(e) = self.tunnels.prepare().await {
            warn!(mode = %self.tunnels.mode(), "tunnel backend preparation failed: {}", e);
        }

        let detections = self
            .detections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(detections) = detections {
            self.orchestrator.spawn(detections);
        }
    }

    /// Stop the session process, then tunnels, then viewers.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.sessions.shutdown().await;
        self.tunnels.shutdown().await;
        self.hub.close_all("server shutting down");
    }
}
