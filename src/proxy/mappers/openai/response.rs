use serde_json::{json, Value};

use crate::constants::MIN_SIGNATURE_LENGTH;
use crate::proxy::ids;
use crate::proxy::mappers::native::{finish_reason_openai, NativeResponse, Part};
use crate::proxy::mappers::tools::restore_tool_name;
use crate::proxy::signature_cache::SignatureCache;

// Native → OpenAI chat completion. Walks parts in order, splitting them into
// reasoning_content, content, and tool_calls; signatures ride the cache so a
// later turn can reattach them.
pub fn build_response(native: &NativeResponse, model: &str, session_id: &str) -> Value {
    let mut reasoning = String::new();
    let mut content = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    if let Some(candidate) = native.first_candidate() {
        for part in &candidate.content.parts {
            match part {
                Part::Thought { text, .. } => reasoning.push_str(text),
                Part::Text { text, .. } => content.push_str(text),
                Part::FunctionCall { function_call, .. } => {
                    let call_id = function_call
                        .id
                        .clone()
                        .unwrap_or_else(ids::tool_call_id);
                    if let Some(signature) = part.signature() {
                        if signature.len() >= MIN_SIGNATURE_LENGTH {
                            SignatureCache::global().put(&call_id, signature.to_string());
                        }
                    }
                    let name = restore_tool_name(session_id, model, &function_call.name);
                    tool_calls.push(json!({
                        "id": call_id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": function_call.args.to_string(),
                        }
                    }));
                }
                _ => {}
            }
        }
    }

    let used_tool = !tool_calls.is_empty();
    let native_finish = native
        .first_candidate()
        .and_then(|c| c.finish_reason.as_deref())
        .unwrap_or("STOP");

    let mut message = json!({
        "role": "assistant",
        "content": content,
    });
    if !reasoning.is_empty() {
        message["reasoning_content"] = json!(reasoning);
    }
    if used_tool {
        message["tool_calls"] = json!(tool_calls);
    }

    let usage = native.usage_metadata.clone().unwrap_or_default();
    json!({
        "id": ids::completion_id(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason_openai(native_finish, used_tool),
        }],
        "usage": {
            "prompt_tokens": usage.prompt_token_count.unwrap_or(0),
            "completion_tokens": usage.candidates_token_count.unwrap_or(0),
            "total_tokens": usage.total_token_count.unwrap_or(
                usage.prompt_token_count.unwrap_or(0)
                    + usage.candidates_token_count.unwrap_or(0)
            ),
        }
    })
}
