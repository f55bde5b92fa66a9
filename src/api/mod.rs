//! HTTP and WebSocket surface of the relay.
//!
//! ## Endpoints
//!
//! ### Open
//! - `GET /health` - Health check with session and viewer counts
//! - `GET /ws/terminal?token=...` - Viewer WebSocket for the live session
//!
//! ### Behind the bearer-token gate
//! - `GET /api/v1` - API information
//! - `POST /api/v1/sessions` - Start the session (409 while one runs)
//! - `GET /api/v1/sessions` - Current session status
//! - `DELETE /api/v1/sessions` - Destroy the session
//! - `POST /api/v1/sessions/command` - Type a command line into the session
//! - `GET /api/v1/tunnels` - Active tunnels
//! - `POST /api/v1/tunnels` - Ensure a tunnel for a port
//! - `DELETE /api/v1/tunnels/{port}` - Tear a tunnel down
//!
//! ## Example
//!
//! ```no_run
//! use cloude_relay::api::{serve, ServerConfig};
//! use cloude_relay::{Config, ServerContext};
//!
//! #[tokio::main]
//! async fn main() -> cloude_relay::Result<()> {
//!     let ctx = ServerContext::build(Config::default())?;
//!     ctx.start().await;
//!     serve(ServerConfig::new("127.0.0.1", 8000), ctx).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

pub use router::{create_router, serve, ServerConfig};
pub use types::{
    api_error, ApiError, CreateSessionRequest, CreateTunnelRequest, ErrorResponse,
    HealthResponse, ListTunnelsResponse, SendCommandRequest, SessionStatusResponse,
};
