//! WebSocket upgrade for event-fabric consumers.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use stevedore_events::serve_socket;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Optional client identity for the per-user connection cap.
    pub user: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    let host = headers.get("host").and_then(|v| v.to_str().ok());
    if !state.origin_policy.allows(origin, host) {
        tracing::warn!(origin = origin.unwrap_or("-"), "websocket origin rejected");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let ip = stevedore_common::source_ip(&headers);
    let hub = state.hub.clone();
    let config = state.socket_config;
    ws.on_upgrade(move |socket| serve_socket(socket, hub, query.user, ip, config))
}
