use std::pin::Pin;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::proxy::ids;
use crate::proxy::mappers::native::{finish_reason_openai, NativeResponse, Part};
use crate::proxy::mappers::sse::{parse_upstream_sse, SseItem, UpstreamByteStream};
use crate::proxy::mappers::tools::restore_tool_name;
use crate::proxy::signature_cache::SignatureCache;

struct ChunkState {
    completion_id: String,
    created: i64,
    model: String,
    session_id: String,
    role_sent: bool,
    tool_index: usize,
    used_tool: bool,
    finished: bool,
}

impl ChunkState {
    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Bytes {
        let body = json!({
            "id": self.completion_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }]
        });
        Bytes::from(format!("data: {}\n\n", body))
    }

    fn delta_with_role(&mut self, mut delta: Value) -> Value {
        if !self.role_sent {
            delta["role"] = json!("assistant");
            self.role_sent = true;
        }
        delta
    }
}

// Upstream SSE → OpenAI chat.completion.chunk frames, terminated by
// `data: [DONE]`. Events are emitted in upstream order, never reordered.
pub fn create_stream(
    upstream: UpstreamByteStream,
    model: String,
    session_id: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    Box::pin(stream! {
        let mut events = parse_upstream_sse(upstream);
        let mut state = ChunkState {
            completion_id: ids::completion_id(),
            created: chrono::Utc::now().timestamp(),
            model,
            session_id,
            role_sent: false,
            tool_index: 0,
            used_tool: false,
            finished: false,
        };

        while let Some(item) = events.next().await {
            let value = match item {
                Ok(SseItem::Data(v)) => v,
                Ok(SseItem::Done) => break,
                Ok(SseItem::Ping) => {
                    yield Ok(Bytes::from(": ping\n\n"));
                    continue;
                }
                Err(e) => {
                    // Terminal error frame in the active protocol, then close.
                    let frame = json!({"error": {"message": e, "type": "upstream_error"}});
                    yield Ok(Bytes::from(format!("data: {}\n\n", frame)));
                    yield Ok(Bytes::from("data: [DONE]\n\n"));
                    return;
                }
            };
            let Some(native) = NativeResponse::parse(&value) else {
                continue;
            };

            if let Some(candidate) = native.first_candidate() {
                for part in &candidate.content.parts {
                    match part {
                        Part::Thought { text, .. } => {
                            let delta = state.delta_with_role(json!({"reasoning_content": text}));
                            yield Ok(state.chunk(delta, None));
                        }
                        Part::Text { text, .. } => {
                            let delta = state.delta_with_role(json!({"content": text}));
                            yield Ok(state.chunk(delta, None));
                        }
                        Part::FunctionCall { function_call, .. } => {
                            let call_id = function_call
                                .id
                                .clone()
                                .unwrap_or_else(ids::tool_call_id);
                            if let Some(signature) = part.signature() {
                                SignatureCache::global().put(&call_id, signature.to_string());
                            }
                            let name = restore_tool_name(
                                &state.session_id,
                                &state.model,
                                &function_call.name,
                            );
                            let index = state.tool_index;
                            state.tool_index += 1;
                            state.used_tool = true;
                            let delta = state.delta_with_role(json!({
                                "tool_calls": [{
                                    "index": index,
                                    "id": call_id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": function_call.args.to_string(),
                                    }
                                }]
                            }));
                            yield Ok(state.chunk(delta, None));
                        }
                        _ => {}
                    }
                }

                if let Some(reason) = candidate.finish_reason.as_deref() {
                    let finish = finish_reason_openai(reason, state.used_tool);
                    let usage = native.usage_metadata.clone().unwrap_or_default();
                    let body = json!({
                        "id": state.completion_id,
                        "object": "chat.completion.chunk",
                        "created": state.created,
                        "model": state.model,
                        "choices": [{
                            "index": 0,
                            "delta": {},
                            "finish_reason": finish,
                        }],
                        "usage": {
                            "prompt_tokens": usage.prompt_token_count.unwrap_or(0),
                            "completion_tokens": usage.candidates_token_count.unwrap_or(0),
                            "total_tokens": usage.total_token_count.unwrap_or(
                                usage.prompt_token_count.unwrap_or(0)
                                    + usage.candidates_token_count.unwrap_or(0)
                            ),
                        }
                    });
                    state.finished = true;
                    yield Ok(Bytes::from(format!("data: {}\n\n", body)));
                }
            }
        }

        if !state.finished {
            yield Ok(state.chunk(json!({}), Some("stop")));
        }
        yield Ok(Bytes::from("data: [DONE]\n\n"));
    })
}
