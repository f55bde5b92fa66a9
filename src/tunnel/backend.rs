//! Strategy seam between the tunnel table and a provider.

use async_trait::async_trait;

use super::TunnelMode;
use crate::Result;

/// One tunnel strategy. The manager serialises calls per port, so an
/// implementation never sees two concurrent `open`s for the same port.
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    fn mode(&self) -> TunnelMode;

    /// One-time setup at server start.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Publish `port` and return its public URL.
    ///
    /// On error nothing may be left running for the port.
    async fn open(&self, port: u16) -> Result<String>;

    /// Withdraw the route for `port`. Unknown ports are a no-op.
    async fn close(&self, port: u16) -> Result<()>;

    /// Whether the route for `port` is still being served.
    async fn is_alive(&self, port: u16) -> bool;

    /// Stop every subprocess the backend owns.
    async fn shutdown(&self);
}
