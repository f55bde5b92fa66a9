//! Table of tunnels keyed by port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use super::dns::CloudflareDns;
use super::{NamedBackend, QuickBackend, Tunnel, TunnelBackend, TunnelMode, TunnelState};
use crate::config::Config;
use crate::error::RelayError;
use crate::Result;

/// Owns every tunnel the relay has published.
///
/// At most one tunnel exists per port. `ensure_tunnel` holds a per-port
/// async lock across the whole create, so concurrent callers for the same
/// port wait for the first one and then observe its result. Different
/// ports never contend.
pub struct TunnelManager {
    backend: Arc<dyn TunnelBackend>,
    table: Mutex<HashMap<u16, Tunnel>>,
    port_locks: Mutex<HashMap<u16, Arc<tokio::sync::Mutex<()>>>>,
}

impl TunnelManager {
    pub fn new(backend: Arc<dyn TunnelBackend>) -> Self {
        Self {
            backend,
            table: Mutex::new(HashMap::new()),
            port_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build the backend selected by `tunnel.mode`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn TunnelBackend> = match config.tunnel.mode {
            TunnelMode::Quick => Arc::new(
                QuickBackend::from_config(&config.tunnel)
                    .map_err(|e| RelayError::tunnel(0, format!("url_pattern: {e}")))?,
            ),
            TunnelMode::Named => {
                let dns = Arc::new(CloudflareDns::from_config(&config.tunnel.dns)?);
                Arc::new(NamedBackend::new(
                    &config.tunnel,
                    &config.session.state_dir,
                    config.server.port,
                    dns,
                ))
            }
        };
        info!(mode = %backend.mode(), "tunnel backend selected");
        Ok(Self::new(backend))
    }

    pub fn mode(&self) -> TunnelMode {
        self.backend.mode()
    }

    /// Backend start-up work, such as exposing the relay on the root domain.
    pub async fn prepare(&self) -> Result<()> {
        self.backend.prepare().await
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u16, Tunnel>> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn port_lock(&self, port: u16) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .port_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(port).or_default())
    }

    /// Return the active tunnel for `port`, creating it if needed.
    ///
    /// A failed create leaves no record behind.
    pub async fn ensure_tunnel(&self, port: u16) -> Result<Tunnel> {
        if port == 0 {
            return Err(RelayError::tunnel(port, "invalid port"));
        }

        let lock = self.port_lock(port);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get(port).filter(Tunnel::is_active) {
            if self.backend.is_alive(port).await {
                return Ok(existing);
            }
            warn!(port, "tunnel no longer alive, recreating");
            self.table().remove(&port);
            if let Err(e) = self.backend.close(port).await {
                warn!(port, "failed to clean up dead tunnel: {}", e);
            }
        }

        let mode = self.backend.mode();
        self.table().insert(
            port,
            Tunnel {
                state: TunnelState::Pending,
                ..Tunnel::active(port, mode, String::new())
            },
        );

        match self.backend.open(port).await {
            Ok(public_url) => {
                let tunnel = Tunnel::active(port, mode, public_url);
                self.table().insert(port, tunnel.clone());
                info!(port, public_url = %tunnel.public_url, "tunnel active");
                Ok(tunnel)
            }
            Err(e) => {
                self.table().remove(&port);
                warn!(port, "tunnel creation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Tear down the tunnel for `port` and return its final record.
    ///
    /// Unknown ports are a no-op and return `None`.
    pub async fn destroy_tunnel(&self, port: u16) -> Result<Option<Tunnel>> {
        let lock = self.port_lock(port);
        let _guard = lock.lock().await;

        let Some(mut tunnel) = self.table().remove(&port) else {
            return Ok(None);
        };
        self.backend.close(port).await?;
        tunnel.state = TunnelState::Destroyed;
        info!(port, public_url = %tunnel.public_url, "tunnel destroyed");
        Ok(Some(tunnel))
    }

    pub fn get(&self, port: u16) -> Option<Tunnel> {
        self.table().get(&port).cloned()
    }

    /// Every tunnel, sorted by port, after a liveness check.
    ///
    /// An active tunnel whose backend route died is reported once as
    /// `Failed` and dropped from the table, so the next trigger recreates it.
    /// The drop happens under the port lock and only if the entry is still
    /// the one that was checked.
    pub async fn list(&self) -> Vec<Tunnel> {
        let snapshot: Vec<Tunnel> = self.table().values().cloned().collect();

        let mut tunnels = Vec::with_capacity(snapshot.len());
        for mut tunnel in snapshot {
            if !tunnel.is_active() || self.backend.is_alive(tunnel.port).await {
                tunnels.push(tunnel);
                continue;
            }

            let lock = self.port_lock(tunnel.port);
            let _guard = lock.lock().await;
            let mut table = self.table();
            match table.get(&tunnel.port).cloned() {
                Some(current) if current.created_at == tunnel.created_at => {
                    warn!(port = tunnel.port, "tunnel failed");
                    table.remove(&tunnel.port);
                    tunnel.state = TunnelState::Failed;
                    tunnels.push(tunnel);
                }
                // Replaced while we were checking; report the replacement.
                Some(current) => tunnels.push(current),
                None => {}
            }
        }
        tunnels.sort_by_key(|t| t.port);
        tunnels
    }

    pub fn active_count(&self) -> usize {
        self.table().values().filter(|t| t.is_active()).count()
    }

    /// Stop every tunnel subprocess.
    pub async fn shutdown(&self) {
        let count = self.table().drain().count();
        self.backend.shutdown().await;
        info!(count, "tunnels shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBackend {
        opens: AtomicU32,
        closes: AtomicU32,
        fail: AtomicBool,
        dead: AtomicBool,
    }

    #[async_trait]
    impl TunnelBackend for FakeBackend {
        fn mode(&self) -> TunnelMode {
            TunnelMode::Quick
        }

        async fn open(&self, port: u16) -> Result<String> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(RelayError::tunnel(port, "boom"));
            }
            self.dead.store(false, Ordering::SeqCst);
            Ok(format!("https://p{port}.example-tunnel.net"))
        }

        async fn close(&self, _port: u16) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_alive(&self, _port: u16) -> bool {
            !self.dead.load(Ordering::SeqCst)
        }

        async fn shutdown(&self) {}
    }

    fn manager() -> (Arc<TunnelManager>, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        (
            Arc::new(TunnelManager::new(backend.clone())),
            backend,
        )
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (tunnels, backend) = manager();
        let first = tunnels.ensure_tunnel(3000).await.unwrap();
        let second = tunnels.ensure_tunnel(3000).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(tunnels.active_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_single_open() {
        let (tunnels, backend) = manager();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tunnels = Arc::clone(&tunnels);
                tokio::spawn(async move { tunnels.ensure_tunnel(3000).await })
            })
            .collect();

        let mut urls = Vec::new();
        for handle in handles {
            urls.push(handle.await.unwrap().unwrap().public_url);
        }
        assert!(urls.iter().all(|u| u == "https://p3000.example-tunnel.net"));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_no_record() {
        let (tunnels, backend) = manager();
        backend.fail.store(true, Ordering::SeqCst);
        assert!(tunnels.ensure_tunnel(4000).await.is_err());
        assert!(tunnels.get(4000).is_none());
        assert!(tunnels.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_then_recreate() {
        let (tunnels, backend) = manager();
        tunnels.ensure_tunnel(5173).await.unwrap();
        let destroyed = tunnels.destroy_tunnel(5173).await.unwrap().unwrap();
        assert_eq!(destroyed.state, TunnelState::Destroyed);
        assert!(!destroyed.is_active());
        assert!(tunnels.destroy_tunnel(5173).await.unwrap().is_none());
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
        assert!(tunnels.get(5173).is_none());

        tunnels.ensure_tunnel(5173).await.unwrap();
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_list_reports_dead_tunnel_once() {
        let (tunnels, backend) = manager();
        tunnels.ensure_tunnel(8080).await.unwrap();
        backend.dead.store(true, Ordering::SeqCst);

        let listed = tunnels.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, TunnelState::Failed);
        assert!(tunnels.list().await.is_empty());
    }

    /// Reports the first liveness check as dead, but only after `release`.
    #[derive(Default)]
    struct SlowCheckBackend {
        checks: AtomicU32,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl TunnelBackend for SlowCheckBackend {
        fn mode(&self) -> TunnelMode {
            TunnelMode::Quick
        }

        async fn open(&self, port: u16) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(format!("https://p{port}.example-tunnel.net"))
        }

        async fn close(&self, _port: u16) -> Result<()> {
            Ok(())
        }

        async fn is_alive(&self, _port: u16) -> bool {
            if self.checks.fetch_add(1, Ordering::SeqCst) == 0 {
                self.release.notified().await;
            }
            false
        }

        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn test_list_keeps_tunnel_recreated_during_check() {
        let backend = Arc::new(SlowCheckBackend::default());
        let tunnels = Arc::new(TunnelManager::new(backend.clone()));
        let original = tunnels.ensure_tunnel(3000).await.unwrap();

        let lister = {
            let tunnels = Arc::clone(&tunnels);
            tokio::spawn(async move { tunnels.list().await })
        };
        while backend.checks.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // The ensure sees the dead route and replaces it while list is checking.
        let replacement = tunnels.ensure_tunnel(3000).await.unwrap();
        assert_ne!(replacement.created_at, original.created_at);
        backend.release.notify_one();

        let listed = lister.await.unwrap();
        assert_eq!(listed, vec![replacement.clone()]);
        assert_eq!(tunnels.get(3000), Some(replacement));
    }

    #[tokio::test]
    async fn test_dead_tunnel_recreated_on_ensure() {
        let (tunnels, backend) = manager();
        tunnels.ensure_tunnel(8080).await.unwrap();
        backend.dead.store(true, Ordering::SeqCst);

        tunnels.ensure_tunnel(8080).await.unwrap();
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_port_zero_rejected() {
        let (tunnels, _) = manager();
        assert!(tunnels.ensure_tunnel(0).await.is_err());
    }
}
