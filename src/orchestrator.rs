//! Reacts to detection events: tunnels for announced ports, annotations for the rest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::TunnelSection;
use crate::session::{SessionDetection, SessionId};
use crate::stream::{ControlFrame, ViewerHub};
use crate::tunnel::TunnelManager;

/// Drives the tunnel manager from the session's output.
///
/// Each port has its own guard, held for the whole attempt; a trigger that
/// finds it taken is dropped rather than queued. After an attempt the port
/// enters a cool-down window during which further triggers are ignored.
/// Results are discarded when the session that asked for them is gone.
pub struct Orchestrator {
    tunnels: Arc<TunnelManager>,
    hub: Arc<ViewerHub>,
    current: watch::Receiver<Option<SessionId>>,
    auto_create: bool,
    cooldown: Duration,
    guards: Mutex<HashMap<u16, Arc<tokio::sync::Mutex<()>>>>,
    attempts: Mutex<HashMap<u16, Instant>>,
}

impl Orchestrator {
    pub fn new(
        tunnels: Arc<TunnelManager>,
        hub: Arc<ViewerHub>,
        current: watch::Receiver<Option<SessionId>>,
        config: &TunnelSection,
    ) -> Arc<Self> {
        Arc::new(Self {
            tunnels,
            hub,
            current,
            auto_create: config.auto_create,
            cooldown: config.cooldown(),
            guards: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        })
    }

    /// Consume detections until every sender is gone.
    pub fn spawn(
        self: &Arc<Self>,
        mut detections: mpsc::UnboundedReceiver<SessionDetection>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(detection) = detections.recv().await {
                this.handle(detection);
            }
            debug!("detection stream closed");
        })
    }

    /// Route one detection. Never blocks; tunnel work runs on its own task.
    pub fn handle(self: &Arc<Self>, detection: SessionDetection) {
        let SessionDetection { session, event } = detection;
        if !self.is_current(session) {
            trace!(session_id = %session, "detection from a finished session");
            return;
        }

        match event.tunnel_port() {
            Some(port) if self.auto_create => self.trigger(session, port),
            Some(port) => trace!(port, "auto-create disabled"),
            None => self.hub.broadcast(ControlFrame::log(format!(
                "[{}] {}",
                event.category.label(),
                event.line
            ))),
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        *self.current.borrow() == Some(session)
    }

    fn guards(&self) -> MutexGuard<'_, HashMap<u16, Arc<tokio::sync::Mutex<()>>>> {
        self.guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attempts(&self) -> MutexGuard<'_, HashMap<u16, Instant>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_guard(&self, port: u16) -> Option<OwnedMutexGuard<()>> {
        let guard = Arc::clone(self.guards().entry(port).or_default());
        guard.try_lock_owned().ok()
    }

    fn cooling_down(&self, port: u16) -> bool {
        self.attempts()
            .get(&port)
            .is_some_and(|at| at.elapsed() < self.cooldown)
    }

    fn trigger(self: &Arc<Self>, session: SessionId, port: u16) {
        let Some(guard) = self.try_guard(port) else {
            trace!(port, "tunnel attempt already in flight");
            return;
        };
        if self.cooling_down(port) {
            trace!(port, "port in cool-down");
            return;
        }

        info!(port, session_id = %session, "port detected, ensuring tunnel");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let result = this.tunnels.ensure_tunnel(port).await;
            this.attempts().insert(port, Instant::now());

            if !this.is_current(session) {
                info!(port, session_id = %session, "session ended during tunnel creation, result discarded");
                return;
            }

            match result {
                Ok(tunnel) => {
                    this.hub
                        .broadcast(ControlFrame::tunnel_created(port, tunnel.public_url));
                }
                Err(e) => {
                    warn!(port, "auto-tunnel failed: {}", e);
                    this.hub.broadcast(ControlFrame::error(format!(
                        "Failed to create tunnel for port {port}: {e}"
                    )));
                }
            }
        });
    }
}
