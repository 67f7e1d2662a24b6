use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::AppError;
use crate::pool::account::{now_ms, Account, AccountSource};
use crate::pool::persistence;
use crate::proxy::auth::issue_token;
use crate::proxy::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// Thin credential check: compare against the configured admin credentials and
// hand out a JWT.
pub async fn handle_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Response {
    if body.username != state.config.admin_username
        || body.password != state.config.admin_password
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"type": "unauthorized", "message": "bad credentials"}})),
        )
            .into_response();
    }
    match issue_token(&state.config.jwt_secret, &body.username) {
        Ok(token) => Json(json!({"token": token})).into_response(),
        Err(e) => AppError::Internal(e).into_response(),
    }
}

pub async fn handle_list_accounts(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.pool.status()).unwrap_or_else(|_| json!({})))
}

#[derive(Debug, Deserialize)]
pub struct AddAccountRequest {
    pub email: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token_expires_at: Option<i64>,
    #[serde(default)]
    pub project_id: Option<String>,
}

pub async fn handle_add_account(
    State(state): State<AppState>,
    Json(body): Json<AddAccountRequest>,
) -> Response {
    let mut account = Account::new(
        body.email,
        body.access_token,
        body.access_token_expires_at.unwrap_or_else(now_ms),
    );
    account.refresh_token = body.refresh_token;
    account.project_id = body.project_id;
    account.source = AccountSource::Manual;

    match state.pool.add_or_replace(account) {
        Ok(()) => (StatusCode::CREATED, Json(json!({"ok": true}))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_delete_account(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Response {
    if state.pool.delete(&email) {
        Json(json!({"ok": true})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"type": "not_found", "message": "no such account"}})),
        )
            .into_response()
    }
}

pub async fn handle_clear_limit(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Json<Value> {
    state.pool.clear_rate_limit(&email);
    Json(json!({"ok": true}))
}

pub async fn handle_revalidate(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Response {
    match state.pool.revalidate(&email).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_reset_rate_limits(State(state): State<AppState>) -> Json<Value> {
    state.pool.reset_all_rate_limits();
    Json(json!({"ok": true}))
}

pub async fn handle_clear_token_caches(State(state): State<AppState>) -> Json<Value> {
    state.pool.clear_all_token_caches();
    Json(json!({"ok": true}))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub mode: ImportMode,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Merge,
    Replace,
}

pub async fn handle_import(
    State(state): State<AppState>,
    Json(body): Json<ImportRequest>,
) -> Response {
    let mut accounts = body.accounts;
    for account in accounts.iter_mut() {
        account.source = AccountSource::Import;
    }
    let replace = body.mode == ImportMode::Replace;
    match state.pool.import(accounts, replace) {
        Ok(count) => {
            info!("Imported {} account(s) (replace: {})", count, replace);
            Json(json!({"ok": true, "imported": count})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn handle_export(State(state): State<AppState>) -> Json<Value> {
    let exported = persistence::export(&state.pool.snapshot());
    Json(serde_json::to_value(exported).unwrap_or_else(|_| json!({})))
}
