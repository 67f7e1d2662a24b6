use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::debug;

use super::common::{build_sse_response, GATEWAY_MODELS};
use crate::error::AppError;
use crate::proxy::dispatcher;
use crate::proxy::ids;
use crate::proxy::mappers::collector::collect_native;
use crate::proxy::mappers::gemini;
use crate::proxy::mappers::native::{wrap_envelope, NativeResponse, Part};
use crate::proxy::mappers::sse::UpstreamByteStream;
use crate::proxy::model_family::{normalize_model, supports_thinking};
use crate::proxy::state::AppState;

// The Gemini surface encodes the action in the final path segment:
// `/v1beta/models/<model>:generateContent`. Axum hands us the whole segment.
fn split_model_action(segment: &str) -> Option<(&str, &str)> {
    segment.split_once(':')
}

pub async fn handle_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let trace_id = ids::trace_id();
    let Some((client_model, action)) = split_model_action(&model_action) else {
        return AppError::Translation(format!(
            "expected model:action path segment, got '{}'",
            model_action
        ))
        .into_response();
    };
    let streaming_route = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return AppError::Translation(format!("unsupported action '{}'", other))
                .into_response()
        }
    };
    // Without alt=sse the streaming surface degrades to newline-delimited
    // JSON.
    let sse_framing = params.get("alt").map(|v| v == "sse").unwrap_or(false);

    let client_model = client_model.to_string();
    let model = normalize_model(&client_model);
    debug!(
        "[{}] /v1beta model={} action={} alt_sse={}",
        trace_id, model, action, sse_framing
    );

    let (inner, session_id) = match gemini::transform_request(&body, &model) {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };
    let mut payload = wrap_envelope("", &model, &session_id, inner);

    let thinking = supports_thinking(&model);
    let upstream_streaming = streaming_route || thinking;

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

    if streaming_route {
        let bytes: UpstreamByteStream = Box::pin(success.response.bytes_stream());
        let stream = gemini::create_stream(bytes, model, session_id, sse_framing);
        return if sse_framing {
            build_sse_response(Body::from_stream(stream))
        } else {
            Response::builder()
                .header("Content-Type", "application/json")
                .body(Body::from_stream(stream))
                .unwrap()
        };
    }

    if upstream_streaming {
        let bytes: UpstreamByteStream = Box::pin(success.response.bytes_stream());
        return match collect_native(bytes).await {
            Ok(native) => {
                let value = native_to_gemini_json(&native);
                Json(gemini::rewrite_response(&value, &model, &session_id)).into_response()
            }
            Err(e) => AppError::UpstreamTransient(e).into_response(),
        };
    }

    match success.response.json::<Value>().await {
        Ok(value) => Json(gemini::rewrite_response(&value, &model, &session_id)).into_response(),
        Err(e) => AppError::Network(e).into_response(),
    }
}

// Rebuilds the plain generateContent JSON from a consolidated stream.
fn native_to_gemini_json(native: &NativeResponse) -> Value {
    let parts: Vec<&Part> = native
        .first_candidate()
        .map(|c| c.content.parts.iter().collect())
        .unwrap_or_default();
    let mut out = json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": parts,
            },
        }]
    });
    if let Some(reason) = native
        .first_candidate()
        .and_then(|c| c.finish_reason.as_deref())
    {
        out["candidates"][0]["finishReason"] = json!(reason);
    }
    if let Some(usage) = &native.usage_metadata {
        out["usageMetadata"] = serde_json::to_value(usage).unwrap_or_default();
    }
    if let Some(version) = &native.model_version {
        out["modelVersion"] = json!(version);
    }
    if let Some(id) = &native.response_id {
        out["responseId"] = json!(id);
    }
    out
}

fn model_metadata(id: &str) -> Value {
    json!({
        "name": format!("models/{}", id),
        "version": "001",
        "displayName": id,
        "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
        "inputTokenLimit": 1048576,
        "outputTokenLimit": crate::constants::GEMINI_MAX_OUTPUT_TOKENS,
    })
}

pub async fn handle_list_models() -> Json<Value> {
    let models: Vec<Value> = GATEWAY_MODELS.iter().map(|id| model_metadata(id)).collect();
    Json(json!({ "models": models }))
}

pub async fn handle_get_model(Path(model_action): Path<String>) -> Response {
    // A bare segment (no action) is a metadata lookup.
    let model = model_action
        .split_once(':')
        .map(|(m, _)| m)
        .unwrap_or(&model_action);
    if GATEWAY_MODELS.contains(&model) {
        Json(model_metadata(model)).into_response()
    } else {
        AppError::UpstreamClient {
            status: 404,
            message: format!("model '{}' not found", model),
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_action_segment_splits() {
        assert_eq!(
            split_model_action("gemini-2.5-pro:generateContent"),
            Some(("gemini-2.5-pro", "generateContent"))
        );
        assert_eq!(
            split_model_action("gemini-2.5-pro:streamGenerateContent"),
            Some(("gemini-2.5-pro", "streamGenerateContent"))
        );
        assert_eq!(split_model_action("gemini-2.5-pro"), None);
    }

    #[test]
    fn consolidated_stream_round_trips_to_gemini_json() {
        let native = NativeResponse::parse(&json!({
            "candidates": [{
                "content": {"parts": [{"text": "hello"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1}
        }))
        .unwrap();
        let value = native_to_gemini_json(&native);
        assert_eq!(value["candidates"][0]["content"]["parts"][0]["text"], "hello");
        assert_eq!(value["candidates"][0]["finishReason"], "STOP");
        assert_eq!(value["usageMetadata"]["promptTokenCount"], 2);
    }
}
