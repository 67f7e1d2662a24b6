use serde_json::{json, Value};

use crate::constants::{GEMINI_MAX_OUTPUT_TOKENS, SKIP_SIGNATURE_SENTINEL};
use crate::error::{AppError, AppResult};
use crate::proxy::ids;
use crate::proxy::model_family::supports_thinking;
use crate::proxy::session::session_id_from_text;
use crate::proxy::signature_cache::SignatureCache;
use crate::proxy::tool_names::{sanitize_tool_name, ToolNameCache};

// Gemini → native is a near-identity mapping over a deep clone: fill missing
// function-call ids (paired positionally with their responses), drop
// unsupported safetySettings, sanitize declared tool names, force VALIDATED
// tool calling, and cap the output budget.
pub fn transform_request(body: &Value, model: &str) -> AppResult<(Value, String)> {
    let mut inner = body.clone();
    let Some(obj) = inner.as_object_mut() else {
        return Err(AppError::Translation(
            "request body must be a JSON object".to_string(),
        ));
    };
    obj.remove("safetySettings");

    let session_id = session_id_from_text(first_user_text(body).as_deref());
    let thinking = supports_thinking(model);

    pair_function_call_ids(&mut inner);
    refill_signatures(&mut inner, thinking);
    normalize_tools(&mut inner, &session_id, model);
    cap_generation_config(&mut inner);

    Ok((inner, session_id))
}

fn first_user_text(body: &Value) -> Option<String> {
    let contents = body.get("contents")?.as_array()?;
    for content in contents {
        let role = content.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        if role != "user" {
            continue;
        }
        let Some(parts) = content.get("parts").and_then(|p| p.as_array()) else {
            continue;
        };
        let text: Vec<&str> = parts
            .iter()
            .filter(|p| p.get("thought").is_none())
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        let joined = text.join(" ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

// Positional pairing: the Nth id-less functionCall in the conversation shares
// a generated id with the Nth id-less functionResponse, up to the shorter
// list. Extra responses still get fresh ids so upstream never sees a bare
// part.
fn pair_function_call_ids(body: &mut Value) {
    let Some(contents) = body.get_mut("contents").and_then(|c| c.as_array_mut()) else {
        return;
    };

    let mut generated: Vec<String> = Vec::new();
    for content in contents.iter_mut() {
        let Some(parts) = content.get_mut("parts").and_then(|p| p.as_array_mut()) else {
            continue;
        };
        for part in parts.iter_mut() {
            if let Some(call) = part.get_mut("functionCall").and_then(|c| c.as_object_mut()) {
                if call.get("id").and_then(|v| v.as_str()).is_none() {
                    let id = ids::tool_call_id();
                    call.insert("id".to_string(), json!(id));
                    generated.push(id);
                }
            }
        }
    }

    let mut next = 0usize;
    for content in contents.iter_mut() {
        let Some(parts) = content.get_mut("parts").and_then(|p| p.as_array_mut()) else {
            continue;
        };
        for part in parts.iter_mut() {
            if let Some(resp) = part
                .get_mut("functionResponse")
                .and_then(|r| r.as_object_mut())
            {
                if resp.get("id").and_then(|v| v.as_str()).is_none() {
                    let id = generated
                        .get(next)
                        .cloned()
                        .unwrap_or_else(ids::tool_call_id);
                    next += 1;
                    resp.insert("id".to_string(), json!(id));
                }
            }
        }
    }
}

fn refill_signatures(body: &mut Value, thinking: bool) {
    let Some(contents) = body.get_mut("contents").and_then(|c| c.as_array_mut()) else {
        return;
    };
    for content in contents.iter_mut() {
        let Some(parts) = content.get_mut("parts").and_then(|p| p.as_array_mut()) else {
            continue;
        };
        for part in parts.iter_mut() {
            let has_outer_sig = part.get("thoughtSignature").is_some();
            let Some(call) = part.get_mut("functionCall").and_then(|c| c.as_object_mut()) else {
                continue;
            };
            if call.contains_key("thoughtSignature") || has_outer_sig {
                continue;
            }
            let id = call
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(signature) = SignatureCache::global().get(&id) {
                call.insert("thoughtSignature".to_string(), json!(signature));
            } else if thinking {
                call.insert(
                    "thoughtSignature".to_string(),
                    json!(SKIP_SIGNATURE_SENTINEL),
                );
            }
        }
    }
}

fn normalize_tools(body: &mut Value, session_id: &str, model: &str) {
    let has_declarations = body
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|tools| {
            tools
                .iter()
                .any(|t| t.get("functionDeclarations").is_some())
        })
        .unwrap_or(false);

    if let Some(tools) = body.get_mut("tools").and_then(|t| t.as_array_mut()) {
        for tool in tools.iter_mut() {
            let Some(decls) = tool
                .get_mut("functionDeclarations")
                .and_then(|d| d.as_array_mut())
            else {
                continue;
            };
            for decl in decls.iter_mut() {
                let Some(name) = decl.get("name").and_then(|n| n.as_str()) else {
                    continue;
                };
                let safe = sanitize_tool_name(name);
                if safe != name {
                    ToolNameCache::global().set_mapping(session_id, model, &safe, name);
                    decl["name"] = json!(safe);
                }
            }
        }
    }

    if has_declarations {
        body["toolConfig"] = json!({
            "functionCallingConfig": { "mode": "VALIDATED" }
        });
    }
}

fn cap_generation_config(body: &mut Value) {
    let Some(config) = body
        .get_mut("generationConfig")
        .and_then(|c| c.as_object_mut())
    else {
        return;
    };
    let capped = config
        .get("maxOutputTokens")
        .and_then(|v| v.as_u64())
        .map(|v| v.min(GEMINI_MAX_OUTPUT_TOKENS));
    if let Some(v) = capped {
        config.insert("maxOutputTokens".to_string(), json!(v));
    }
}
