use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::proxy::{admin, auth, handlers};
use crate::proxy::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/accounts",
            get(admin::handle_list_accounts).post(admin::handle_add_account),
        )
        .route("/accounts/import", post(admin::handle_import))
        .route("/accounts/export", get(admin::handle_export))
        .route("/accounts/:email", delete(admin::handle_delete_account))
        .route("/accounts/:email/clear-limit", post(admin::handle_clear_limit))
        .route("/accounts/:email/revalidate", post(admin::handle_revalidate))
        .route("/reset-rate-limits", post(admin::handle_reset_rate_limits))
        .route("/clear-token-caches", post(admin::handle_clear_token_caches))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_auth,
        ))
        .route("/login", post(admin::handle_login));

    Router::new()
        .route("/health", get(handlers::common::handle_health))
        .route("/refresh-token", post(handlers::common::handle_refresh_token))
        .route(
            "/account-limits",
            get(handlers::common::handle_account_limits),
        )
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route("/v1/models", get(handlers::openai::handle_list_models))
        .route("/v1/messages", post(handlers::claude::handle_messages))
        .route("/v1beta/models", get(handlers::gemini::handle_list_models))
        .route(
            "/v1beta/models/:model_action",
            get(handlers::gemini::handle_get_model).post(handlers::gemini::handle_generate),
        )
        .nest("/admin", admin_routes)
        .with_state(state)
}
