//! API integration tests.
//!
//! These tests drive the full router with axum's test utilities. Tunnels go
//! through an in-memory backend; session tests spawn `/bin/sh` in a PTY and
//! only run on Unix.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use cloude_relay::api::create_router;
use cloude_relay::tunnel::{TunnelBackend, TunnelMode};
use cloude_relay::{Config, ServerContext};

struct MemoryBackend {
    opens: AtomicU32,
}

#[async_trait]
impl TunnelBackend for MemoryBackend {
    fn mode(&self) -> TunnelMode {
        TunnelMode::Quick
    }

    async fn open(&self, port: u16) -> cloude_relay::Result<String> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://p{port}.example-tunnel.net"))
    }

    async fn close(&self, _port: u16) -> cloude_relay::Result<()> {
        Ok(())
    }

    async fn is_alive(&self, _port: u16) -> bool {
        true
    }

    async fn shutdown(&self) {}
}

fn test_config(state_dir: &Path) -> Config {
    let mut config = Config::default();
    config.session.state_dir = state_dir.to_path_buf();
    config.session.default_working_dir = state_dir.join("projects");
    config.session.shell = "/bin/sh".to_string();
    config.session.launch_command = "sleep 30".to_string();
    config.session.kill_grace_ms = 500;
    config
}

struct TestApp {
    ctx: ServerContext,
    backend: Arc<MemoryBackend>,
    _dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        let backend = Arc::new(MemoryBackend {
            opens: AtomicU32::new(0),
        });
        let ctx = ServerContext::with_backend(config, backend.clone()).unwrap();
        Self {
            ctx,
            backend,
            _dir: dir,
        }
    }

    fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }
}

/// Helper to create a JSON request.
fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    match body {
        Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Helper to extract JSON from response.
async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

// ============================================================================
// Health & Info Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["session_active"], false);
    assert_eq!(json["viewers"], 0);
}

#[tokio::test]
async fn test_api_info_endpoint() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/api/v1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["name"], "cloude-relay");
    assert_eq!(json["tunnel_mode"], "quick");
}

// ============================================================================
// Auth Gate Tests
// ============================================================================

fn gated() -> TestApp {
    TestApp::with_config(|config| {
        config.auth.enabled = true;
        config.auth.tokens = vec!["secret".to_string()];
    })
}

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let app = gated();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/api/v1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = json_request(Method::GET, "/api/v1", None);
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_is_open() {
    let app = gated();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_terminal_rejects_bad_token_before_upgrade() {
    let app = gated();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/ws/terminal?token=wrong", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_terminal_without_session() {
    let app = gated();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/ws/terminal?token=secret", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["code"], "NO_SESSION");
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_get_session_none() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/api/v1/sessions", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["code"], "NO_SESSION");
}

#[tokio::test]
async fn test_delete_session_is_idempotent() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(Method::DELETE, "/api/v1/sessions", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_command_without_session() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/sessions/command",
            Some(json!({"command": "ls"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_session_in_file_path() {
    let app = TestApp::new();
    let file = app._dir.path().join("occupied");
    std::fs::write(&file, b"").unwrap();

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/sessions",
            Some(json!({"working_dir": file.to_string_lossy()})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response_json(response).await["code"], "SPAWN_FAILED");
}

#[tokio::test]
#[cfg(unix)]
async fn test_session_lifecycle() {
    let app = TestApp::new();
    let project = app._dir.path().join("proj");

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/sessions",
            Some(json!({"working_dir": project.to_string_lossy()})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    assert_eq!(created["state"], "running");
    assert!(project.is_dir());

    // A second create is rejected, not queued.
    let response = app
        .router()
        .oneshot(json_request(Method::POST, "/api/v1/sessions", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/api/v1/sessions", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = response_json(response).await;
    assert_eq!(status["id"], created["id"]);
    assert_eq!(status["active_tunnels"], 0);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/sessions/command",
            Some(json!({"command": "echo hi"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router()
        .oneshot(json_request(Method::DELETE, "/api/v1/sessions", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.ctx.sessions.current_id().is_none());
}

// ============================================================================
// Tunnel Tests
// ============================================================================

#[tokio::test]
async fn test_manual_tunnel_lifecycle() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/tunnels",
            Some(json!({"port": 3000})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let tunnel = response_json(response).await;
    assert_eq!(tunnel["port"], 3000);
    assert_eq!(tunnel["public_url"], "https://p3000.example-tunnel.net");
    assert_eq!(tunnel["state"], "active");

    // Same port again returns the existing tunnel.
    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/tunnels",
            Some(json!({"port": 3000})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.backend.opens.load(Ordering::SeqCst), 1);

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/api/v1/tunnels", None))
        .await
        .unwrap();
    let list = response_json(response).await;
    assert_eq!(list["count"], 1);
    assert_eq!(list["mode"], "quick");

    let response = app
        .router()
        .oneshot(json_request(Method::DELETE, "/api/v1/tunnels/3000", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.ctx.tunnels.active_count(), 0);
}

#[tokio::test]
async fn test_tunnel_port_zero_rejected() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/tunnels",
            Some(json!({"port": 0})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.backend.opens.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_json_body() {
    let app = TestApp::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/tunnels")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("not valid json"))
        .unwrap();

    let response = app.router().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_method_not_allowed() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(Method::PUT, "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_not_found_route() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(Method::GET, "/nonexistent", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
