//! Request dispatcher: one entry point, content-driven routing.
//!
//! Precedence (first match wins): admin/health routes are registered
//! directly on the router; then `X-Amz-Target` namespaces (ECS,
//! service discovery); then form bodies carrying a recognised ELBv2
//! `Action`; everything else is reverse-proxied upstream. The body is
//! buffered only once header routing is ambiguous, and handed intact to
//! whichever handler wins.

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::query::QueryParams;
use crate::state::AppState;
use crate::{ecs_wire, elbv2_wire, sd_wire};

/// Bodies above this are only ever proxied.
const MAX_API_BODY: usize = 8 * 1024 * 1024;

pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let target = parts
        .headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = match to_bytes(body, MAX_API_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    if let Some(target) = target.as_deref() {
        if let Some(action) = target.strip_prefix(ecs_wire::ECS_TARGET_PREFIX) {
            return ecs_wire::handle(&state.ecs, action, body).await;
        }
        if let Some(action) = target.strip_prefix(sd_wire::SD_TARGET_PREFIX) {
            return state.sd.handle(action, body).await;
        }
        // Unknown namespace: the upstream may speak it.
        return state
            .proxy
            .forward(parts.method, &parts.uri, &parts.headers, body)
            .await;
    }

    if is_form(&parts.headers) {
        let params = QueryParams::parse(&body);
        if let Some(action) = params.get("Action")
            && elbv2_wire::is_elbv2_action(action)
        {
            return elbv2_wire::handle(&state.elbv2, params).await;
        }
    }

    state
        .proxy
        .forward(parts.method, &parts.uri, &parts.headers, body)
        .await
}

fn is_form(headers: &axum::http::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

/// Recovered panic -> 500 JSON envelope, process stays up.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("panic");
    tracing::error!(detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "__type": "InternalFailure",
            "message": "internal error",
        })),
    )
        .into_response()
}
