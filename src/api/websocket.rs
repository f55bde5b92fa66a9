//! Viewer WebSocket: raw terminal bytes both ways, control frames as text.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::types::{api_error, ErrorResponse};
use crate::context::ServerContext;
use crate::error::RelayError;
use crate::stream::{close_code, Attachment, Coalescer, ControlFrame, Flush, Outbound};

/// How long a closing connection may take to flush its queue.
const CLOSE_FLUSH: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrade handler for `/ws/terminal`.
///
/// Auth and session presence are checked before the upgrade so a rejected
/// client gets a plain HTTP status instead of an immediately closed socket.
pub async fn terminal_ws(
    State(ctx): State<ServerContext>,
    Query(query): Query<TerminalQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !ctx.gate.allows(query.token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(ErrorResponse::unauthorized())).into_response();
    }
    if ctx.sessions.current_id().is_none() {
        return api_error(RelayError::NoSession).into_response();
    }
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_viewer(socket, ctx)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Why the read side stopped.
enum ReadEnd {
    /// Client went away; nothing left to flush.
    Disconnected,
    /// Server decided to close; a close frame is queued.
    Closing,
}

async fn handle_viewer(socket: WebSocket, ctx: ServerContext) {
    let (mut sink, stream) = socket.split();

    let Attachment {
        id,
        tx,
        rx,
        evicted,
    } = match ctx.sessions.attach_viewer().await {
        Ok(attachment) => attachment,
        Err(e) => {
            let _ = sink
                .send(close_message(close_code::POLICY, &e.to_string()))
                .await;
            return;
        }
    };
    info!(viewer = %id, "viewer connected");

    let limit = ctx.config.stream.coalesce_limit;
    let mut writer = tokio::spawn(write_loop(sink, rx, evicted, limit));

    let end = tokio::select! {
        end = read_loop(stream, &ctx, &tx, ctx.config.stream.idle_timeout()) => end,
        _ = &mut writer => ReadEnd::Disconnected,
    };

    ctx.hub.detach(id);
    drop(tx);
    if let ReadEnd::Closing = end {
        let _ = tokio::time::timeout(CLOSE_FLUSH, &mut writer).await;
    }
    writer.abort();
    info!(viewer = %id, "viewer disconnected");
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    evicted: Arc<Notify>,
    limit: usize,
) {
    let mut coalescer = Coalescer::new(limit);
    loop {
        let flush = tokio::select! {
            flush = coalescer.next(&mut rx) => flush,
            _ = evicted.notified() => Some(Flush::Close {
                code: close_code::OVERLOADED,
                reason: "viewer fell behind".to_string(),
            }),
        };

        let message = match flush {
            None => break,
            Some(Flush::Data(data)) => Message::Binary(data),
            Some(Flush::Frame(frame)) => Message::Text(frame.to_json().into()),
            Some(Flush::Close { code, reason }) => {
                let _ = sink.send(close_message(code, &reason)).await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    ctx: &ServerContext,
    tx: &mpsc::Sender<Outbound>,
    idle: Duration,
) -> ReadEnd {
    loop {
        let message = match tokio::time::timeout(idle, stream.next()).await {
            Err(_) => {
                debug!("viewer idle timeout");
                let _ = tx.try_send(Outbound::Close {
                    code: close_code::AWAY,
                    reason: "idle timeout".to_string(),
                });
                return ReadEnd::Closing;
            }
            Ok(None) | Ok(Some(Err(_))) => return ReadEnd::Disconnected,
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Binary(data) => {
                if let Err(e) = ctx.sessions.write(data).await {
                    warn!("dropping viewer input: {}", e);
                }
            }
            Message::Text(text) => match ControlFrame::parse_client(&text) {
                Ok(ControlFrame::Resize { cols, rows }) => {
                    if let Err(e) = ctx.sessions.resize(cols, rows).await {
                        warn!(cols, rows, "resize failed: {}", e);
                    }
                }
                Ok(ControlFrame::Ping) => {
                    let _ = tx.try_send(Outbound::Frame(ControlFrame::Pong));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("closing viewer: {}", e);
                    let _ = tx.try_send(Outbound::Frame(ControlFrame::error(e.to_string())));
                    let _ = tx.try_send(Outbound::Close {
                        code: close_code::PROTOCOL,
                        reason: "malformed control frame".to_string(),
                    });
                    return ReadEnd::Closing;
                }
            },
            Message::Close(_) => return ReadEnd::Disconnected,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}
