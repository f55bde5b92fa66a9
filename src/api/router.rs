//! API router configuration.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{any, delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::handlers::{
    api_info, create_session, create_tunnel, delete_session, delete_tunnel, get_session, health,
    list_tunnels, send_command,
};
use super::websocket::terminal_ws;
use crate::context::ServerContext;
use crate::security::auth_middleware;

/// Create the API router for a wired server context.
pub fn create_router(ctx: ServerContext) -> Router {
    let gate = Arc::clone(&ctx.gate);

    let session_routes = Router::new()
        .route(
            "/",
            get(get_session).post(create_session).delete(delete_session),
        )
        .route("/command", post(send_command));

    let tunnel_routes = Router::new()
        .route("/", get(list_tunnels).post(create_tunnel))
        .route("/{port}", delete(delete_tunnel));

    let api_v1 = Router::new()
        .route("/", get(api_info))
        .nest("/sessions", session_routes)
        .nest("/tunnels", tunnel_routes)
        .route_layer(middleware::from_fn_with_state(gate, auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws/terminal", any(terminal_ws))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ctx)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Wait for SIGINT/SIGTERM and shut components down in order.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            graceful_shutdown: true,
        }
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 8000)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Run the API server until it fails or, with graceful shutdown, until a
/// termination signal arrives; the context is shut down afterwards.
pub async fn serve(config: ServerConfig, ctx: ServerContext) -> crate::Result<()> {
    let addr = config.bind_address();
    let router = create_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("cloude-relay listening on {}", addr);

    let server = axum::serve(listener, router);
    let result = if config.graceful_shutdown {
        server.with_graceful_shutdown(shutdown_signal()).await
    } else {
        server.await
    };

    ctx.shutdown().await;
    result?;
    Ok(())
}
