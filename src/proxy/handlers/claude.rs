use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::debug;

use super::common::build_sse_response;
use crate::error::AppError;
use crate::proxy::dispatcher;
use crate::proxy::ids;
use crate::proxy::mappers::claude::{self, ClaudeRequest};
use crate::proxy::mappers::collector::collect_native;
use crate::proxy::mappers::native::{wrap_envelope, NativeResponse};
use crate::proxy::mappers::sse::UpstreamByteStream;
use crate::proxy::model_family::{normalize_model, supports_thinking};
use crate::proxy::state::AppState;

pub async fn handle_messages(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let trace_id = ids::trace_id();
    let request: ClaudeRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return AppError::Translation(format!("invalid messages request: {}", e))
                .into_response()
        }
    };
    let client_model = request.model.clone();
    let model = normalize_model(&client_model);
    debug!(
        "[{}] /v1/messages model={} stream={}",
        trace_id, model, request.stream
    );

    let (inner, session_id) = match claude::transform_request(&request, &model) {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };
    let mut payload = wrap_envelope("", &model, &session_id, inner);

    let thinking = supports_thinking(&model);
    let upstream_streaming = request.stream || thinking;

    let success = match dispatcher::dispatch(
        &state.pool,
        &state.upstream,
        &mut payload,
        upstream_streaming,
        &trace_id,
    )
    .await
    {
        Ok(success) => success,
        Err(e) => return claude_error(e),
    };

    if request.stream {
        let bytes: UpstreamByteStream = Box::pin(success.response.bytes_stream());
        let stream = claude::create_stream(bytes, client_model, session_id);
        return build_sse_response(Body::from_stream(stream));
    }

    if upstream_streaming {
        let bytes: UpstreamByteStream = Box::pin(success.response.bytes_stream());
        return match collect_native(bytes).await {
            Ok(native) => {
                Json(claude::build_response(&native, &client_model, &session_id)).into_response()
            }
            Err(e) => claude_error(AppError::UpstreamTransient(e)),
        };
    }

    match success.response.json::<Value>().await {
        Ok(value) => match NativeResponse::parse(&value) {
            Some(native) => {
                Json(claude::build_response(&native, &client_model, &session_id)).into_response()
            }
            None => claude_error(AppError::UpstreamTransient(
                "unparsable upstream response".to_string(),
            )),
        },
        Err(e) => claude_error(AppError::Network(e)),
    }
}

// Anthropic clients expect their own error envelope.
fn claude_error(error: AppError) -> Response {
    let status = error.status();
    let error_type = match &error {
        AppError::NoAccountsAvailable(_) | AppError::RateLimited(_) => "overloaded_error",
        AppError::Unauthorized(_) => "authentication_error",
        AppError::Translation(_) | AppError::UpstreamClient { .. } => "invalid_request_error",
        _ => "api_error",
    };
    (
        status,
        Json(serde_json::json!({
            "type": "error",
            "error": { "type": error_type, "message": error.to_string() }
        })),
    )
        .into_response()
}
