use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::proxy::state::AppState;

// Model ids the gateway serves. Everything maps onto the same upstream; the
// ids just pick the translation path and the target model.
pub const GATEWAY_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.5-pro-thinking",
    "gemini-3-pro",
    "gemini-3-flash",
    "claude-sonnet-4",
    "claude-sonnet-4-thinking",
    "claude-opus-4",
];

pub fn build_sse_response(body: Body) -> Response {
    Response::builder()
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap()
}

pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let status = state.pool.status();
    Json(json!({
        "status": "ok",
        "accounts": {
            "total": status.total,
            "available": status.available,
            "rate_limited": status.rate_limited,
            "invalid": status.invalid,
        }
    }))
}

pub async fn handle_account_limits(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.pool.status()).unwrap_or_else(|_| json!({})))
}

// Forces a refresh on every refreshable account and reports each outcome.
pub async fn handle_refresh_token(State(state): State<AppState>) -> Response {
    let results = state.pool.refresh_all().await;
    let report: Vec<Value> = results
        .iter()
        .map(|(email, outcome)| match outcome {
            Ok(()) => json!({"email": email, "ok": true}),
            Err(e) => json!({"email": email, "ok": false, "error": e}),
        })
        .collect();
    let refreshed = results.iter().filter(|(_, r)| r.is_ok()).count();
    Json(json!({
        "refreshed": refreshed,
        "failed": results.len() - refreshed,
        "results": report,
    }))
    .into_response()
}
