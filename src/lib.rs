//! # cloude-relay
//!
//! Runs one coding-assistant session inside a pseudo-terminal and relays it
//! to remote viewers.
//!
//! The PTY output is fanned out over WebSockets and, at the same time,
//! scanned line by line. When the assistant starts a dev server and prints
//! its local address, the relay opens a public tunnel to that port and
//! tells every viewer where to find it.
//!
//! ## Features
//!
//! - **Single PTY session**: create, write, resize and destroy one session
//!   whose output keeps flowing with or without viewers
//! - **Pattern detection**: regex rules over ANSI-stripped output lines
//! - **Hybrid tunnels**: ephemeral quick tunnels, or a named connector with
//!   stable per-port DNS aliases that survive restarts
//! - **Viewer streaming**: raw binary terminal frames plus JSON control frames
//!
//! ## Quick Start
//!
//! ```no_run
//! use cloude_relay::{CreateOptions, Config, ServerContext};
//!
//! #[tokio::main]
//! async fn main() -> cloude_relay::Result<()> {
//!     cloude_relay::logging::try_init("info").ok();
//!
//!     let ctx = ServerContext::build(Config::default())?;
//!     ctx.start().await;
//!
//!     let session = ctx.sessions.create(CreateOptions::default()).await?;
//!     println!("session {} running with PID {}", session.id, session.pid);
//!
//!     ctx.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod pty;
pub mod security;
pub mod session;
pub mod state_file;
pub mod stream;
pub mod tunnel;

// Re-export commonly used types
pub use config::Config;
pub use context::ServerContext;
pub use detect::{DetectionEvent, PatternDetector, PatternRule};
pub use error::{RelayError, Result};
pub use orchestrator::Orchestrator;
pub use pty::{NativePty, PtySize};
pub use session::{CreateOptions, LaunchMode, SessionId, SessionInfo, SessionManager, SessionState};
pub use stream::{ControlFrame, ViewerHub};
pub use tunnel::{Tunnel, TunnelManager, TunnelMode, TunnelState};
