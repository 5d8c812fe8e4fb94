//! Health endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let storage_healthy = state.storage.healthy().await;
    let (kubernetes, kube_details) = state.coordinator.health().await;
    let clients = state.hub.client_count().await;
    let uptime = (Utc::now() - state.started_at).num_seconds();

    let status = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if storage_healthy { "healthy" } else { "degraded" },
            "uptimeSeconds": uptime,
            "components": {
                "storage": if storage_healthy { "healthy" } else { "unhealthy" },
                "kubernetes": kubernetes,
                "kubernetesDetails": kube_details,
                "eventHub": {"clients": clients},
            },
        })),
    )
}
