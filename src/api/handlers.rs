//! REST API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use super::types::{
    api_error, ApiError, CreateSessionRequest, CreateTunnelRequest, ErrorResponse, HealthResponse,
    ListTunnelsResponse, SendCommandRequest, SessionStatusResponse,
};
use crate::context::ServerContext;
use crate::error::RelayError;
use crate::tunnel::Tunnel;

/// Health check endpoint.
pub async fn health(State(ctx): State<ServerContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        session_active: ctx.sessions.current_id().is_some(),
        viewers: ctx.hub.len(),
    })
}

/// API information endpoint.
pub async fn api_info(State(ctx): State<ServerContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "tunnel_mode": ctx.tunnels.mode(),
    }))
}

async fn status(ctx: &ServerContext) -> Result<SessionStatusResponse, ApiError> {
    let session = ctx
        .sessions
        .info()
        .await
        .ok_or_else(|| api_error(RelayError::NoSession))?;
    Ok(SessionStatusResponse::new(
        session,
        ctx.hub.len(),
        ctx.tunnels.active_count(),
    ))
}

/// Start the session.
pub async fn create_session(
    State(ctx): State<ServerContext>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionStatusResponse>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = ctx
        .sessions
        .create(req.into_options())
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionStatusResponse::new(
            session,
            ctx.hub.len(),
            ctx.tunnels.active_count(),
        )),
    ))
}

/// Current session status.
pub async fn get_session(
    State(ctx): State<ServerContext>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    status(&ctx).await.map(Json)
}

/// Destroy the session. Succeeds when there is none.
pub async fn delete_session(State(ctx): State<ServerContext>) -> Result<StatusCode, ApiError> {
    ctx.sessions.destroy().await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Type a command line into the session.
pub async fn send_command(
    State(ctx): State<ServerContext>,
    Json(req): Json<SendCommandRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.sessions
        .send_command(&req.command)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Active tunnels.
pub async fn list_tunnels(State(ctx): State<ServerContext>) -> Json<ListTunnelsResponse> {
    let tunnels = ctx.tunnels.list().await;
    Json(ListTunnelsResponse {
        mode: ctx.tunnels.mode().to_string(),
        count: tunnels.len(),
        tunnels,
    })
}

/// Create (or return) the tunnel for a port.
pub async fn create_tunnel(
    State(ctx): State<ServerContext>,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<(StatusCode, Json<Tunnel>), ApiError> {
    if req.port == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("port must be non-zero")),
        ));
    }
    info!(port = req.port, "manual tunnel requested");
    let tunnel = ctx
        .tunnels
        .ensure_tunnel(req.port)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(tunnel)))
}

/// Tear down the tunnel for a port.
pub async fn delete_tunnel(
    State(ctx): State<ServerContext>,
    Path(port): Path<u16>,
) -> Result<StatusCode, ApiError> {
    ctx.tunnels.destroy_tunnel(port).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
