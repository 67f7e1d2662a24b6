use serde_json::{json, Value};

use crate::proxy::ids;
use crate::proxy::mappers::native::{finish_reason_claude, NativeResponse, Part};
use crate::proxy::mappers::tools::restore_tool_name;
use crate::proxy::signature_cache::SignatureCache;

// Native → Anthropic message (non-streaming path).
pub fn build_response(native: &NativeResponse, model: &str, session_id: &str) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut used_tool = false;

    if let Some(candidate) = native.first_candidate() {
        for part in &candidate.content.parts {
            match part {
                Part::Thought {
                    text,
                    thought_signature,
                    ..
                } => {
                    let mut block = json!({ "type": "thinking", "thinking": text });
                    if let Some(sig) = thought_signature {
                        block["signature"] = json!(sig);
                    }
                    content.push(block);
                }
                Part::Text { text, .. } => {
                    content.push(json!({ "type": "text", "text": text }));
                }
                Part::FunctionCall { function_call, .. } => {
                    used_tool = true;
                    let call_id = function_call
                        .id
                        .clone()
                        .unwrap_or_else(ids::tool_call_id);
                    if let Some(signature) = part.signature() {
                        SignatureCache::global().put(&call_id, signature.to_string());
                    }
                    content.push(json!({
                        "type": "tool_use",
                        "id": call_id,
                        "name": restore_tool_name(session_id, model, &function_call.name),
                        "input": function_call.args,
                    }));
                }
                _ => {}
            }
        }
    }

    let native_finish = native
        .first_candidate()
        .and_then(|c| c.finish_reason.as_deref())
        .unwrap_or("STOP");
    let usage = native.usage_metadata.clone().unwrap_or_default();

    json!({
        "id": native
            .response_id
            .clone()
            .unwrap_or_else(ids::message_id),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": finish_reason_claude(native_finish, used_tool),
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage.prompt_token_count.unwrap_or(0),
            "output_tokens": usage.candidates_token_count.unwrap_or(0),
        }
    })
}
