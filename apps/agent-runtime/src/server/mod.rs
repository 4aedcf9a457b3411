// [[ddcop-agent-runtime]]/src/server/mod.rs
// Purpose: The admin HTTP/WS surface.
// Architecture: External Collaborator (operator-facing)
// Dependencies: Axum, Tower, Tokio

pub mod handlers;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::broker::InProcessBroker;
use crate::registry::AgentRegistry;

/// State shared by every handler: the live agent directory and a tap
/// into the broker's full traffic, for `GET /ws/events`.
pub struct AdminState {
    pub registry: Arc<AgentRegistry>,
    pub broker: Arc<InProcessBroker>,
}

pub fn router(state: Arc<AdminState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/:id", get(handlers::get_agent))
        .route("/ws/events", get(handlers::ws_events))
        .layer(cors)
        .with_state(state)
}
