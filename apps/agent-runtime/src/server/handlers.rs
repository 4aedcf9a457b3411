// [[ddcop-agent-runtime]]/src/server/handlers.rs
// Purpose: Route handlers for the admin HTTP/WS surface.
// Architecture: External Collaborator (operator-facing)
// Dependencies: Axum, Tokio, serde_json

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use crate::graph::AgentId;

use super::AdminState;

pub async fn health(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(json!({"status": "ok", "agents": state.registry.len()}))
}

pub async fn list_agents(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(state.registry.all())
}

pub async fn get_agent(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&AgentId::from(id.as_str())) {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no agent `{id}`")).into_response(),
    }
}

/// Streams every envelope the broker sees, tagged with the topic it
/// was published to, as newline-delimited JSON text frames — the
/// reference exchange has no equivalent surface, so this plays the
/// role the source's `ws_runtime_stream` handler plays for artifact
/// events: a thin tap the dashboard can subscribe to without polling.
pub async fn ws_events(
    State(state): State<Arc<AdminState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_event_stream(socket, state))
}

async fn handle_event_stream(mut socket: WebSocket, state: Arc<AdminState>) {
    let mut tap = state.broker.tap();
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "ws_events client error");
                        break;
                    }
                    _ => {}
                }
            }
            event = tap.recv() => {
                match event {
                    Ok((topic, envelope)) => {
                        let frame = json!({"topic": topic, "envelope": envelope});
                        if socket.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "ws_events tap lagged, dropping oldest frames");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
