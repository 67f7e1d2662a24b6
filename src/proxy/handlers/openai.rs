use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::debug;

use super::common::{build_sse_response, GATEWAY_MODELS};
use crate::error::AppError;
use crate::proxy::dispatcher;
use crate::proxy::ids;
use crate::proxy::mappers::collector::collect_native;
use crate::proxy::mappers::native::{wrap_envelope, NativeResponse};
use crate::proxy::mappers::openai::{self, OpenAIRequest};
use crate::proxy::mappers::sse::UpstreamByteStream;
use crate::proxy::model_family::{normalize_model, supports_thinking};
use crate::proxy::state::AppState;

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let trace_id = ids::trace_id();
    let request: OpenAIRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return AppError::Translation(format!("invalid chat completion request: {}", e))
                .into_response()
        }
    };
    let client_model = request.model.clone();
    let model = normalize_model(&client_model);
    debug!(
        "[{}] /v1/chat/completions model={} stream={}",
        trace_id, model, request.stream
    );

    let (inner, session_id) = match openai::transform_request(&request, &model) {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };
    let mut payload = wrap_envelope("", &model, &session_id, inner);

    // The upstream always speaks SSE for thinking models, so the unary path
    // drains the stream internally.
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
        Err(e) => return e.into_response(),
    };

    if request.stream {
        let bytes: UpstreamByteStream = Box::pin(success.response.bytes_stream());
        let stream = openai::create_stream(bytes, client_model, session_id);
        return build_sse_response(Body::from_stream(stream));
    }

    if upstream_streaming {
        let bytes: UpstreamByteStream = Box::pin(success.response.bytes_stream());
        return match collect_native(bytes).await {
            Ok(native) => {
                Json(openai::build_response(&native, &client_model, &session_id)).into_response()
            }
            Err(e) => AppError::UpstreamTransient(e).into_response(),
        };
    }

    match success.response.json::<Value>().await {
        Ok(value) => match NativeResponse::parse(&value) {
            Some(native) => {
                Json(openai::build_response(&native, &client_model, &session_id)).into_response()
            }
            None => AppError::UpstreamTransient("unparsable upstream response".to_string())
                .into_response(),
        },
        Err(e) => AppError::Network(e).into_response(),
    }
}

pub async fn handle_list_models() -> Json<Value> {
    let data: Vec<Value> = GATEWAY_MODELS
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 1706745600,
                "owned_by": "antigravity",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}
