//! Public tunnels for local ports.
//!
//! The deployment picks one strategy at start-up. Quick mode runs one
//! provider subprocess per port and scrapes the ephemeral URL from its
//! output. Named mode keeps a single connector process running, routes each
//! port through it, and gives every port a stable `{port}.{domain}` alias.
//! [`TunnelManager`] sits in front of either strategy and enforces one
//! tunnel per port.

mod alias;
mod backend;
pub mod dns;
mod manager;
mod named;
mod quick;
mod types;

pub use alias::{AliasEntry, AliasStore};
pub use backend::TunnelBackend;
pub use dns::{CloudflareDns, DnsProvider, DnsRecord, RetryPolicy};
pub use manager::TunnelManager;
pub use named::NamedBackend;
pub use quick::QuickBackend;
pub use types::{Tunnel, TunnelMode, TunnelState, UnknownMode};
