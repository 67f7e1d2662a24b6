use std::collections::HashMap;

use serde_json::{json, Value};

use super::models::{tool_result_output, ClaudeContent, ClaudeRequest, ContentBlock};
use crate::constants::SKIP_SIGNATURE_SENTINEL;
use crate::error::{AppError, AppResult};
use crate::proxy::mappers::tools::{self, ToolDeclaration};
use crate::proxy::model_family::{cap_max_output_tokens, supports_thinking};
use crate::proxy::session::session_id_from_text;
use crate::proxy::signature_cache::SignatureCache;

// Anthropic Messages → native.
pub fn transform_request(request: &ClaudeRequest, model: &str) -> AppResult<(Value, String)> {
    let session_id = session_id_from_text(request.first_user_text().as_deref());
    let thinking = supports_thinking(model);

    // tool_use_id → name, so tool_result blocks can name their response.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for message in &request.messages {
        if let ClaudeContent::Blocks(blocks) = &message.content {
            for block in blocks {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    call_names.insert(id.clone(), name.clone());
                }
            }
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for message in &request.messages {
        let role = match message.role.as_str() {
            "assistant" => "model",
            _ => "user",
        };
        let mut parts: Vec<Value> = Vec::new();

        match &message.content {
            ClaudeContent::Text(text) => {
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
            }
            ClaudeContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            parts.push(json!({ "text": text }));
                        }
                        ContentBlock::Image { source } => {
                            if source.source_type == "base64" {
                                if let (Some(media), Some(data)) =
                                    (&source.media_type, &source.data)
                                {
                                    parts.push(json!({
                                        "inlineData": { "mimeType": media, "data": data }
                                    }));
                                }
                            }
                        }
                        ContentBlock::Thinking {
                            thinking: thought_text,
                            signature,
                        } => {
                            let mut part = json!({ "text": thought_text, "thought": true });
                            if let Some(sig) = signature {
                                part["thoughtSignature"] = json!(sig);
                            }
                            parts.push(part);
                        }
                        ContentBlock::RedactedThinking { .. } => {
                            // Nothing upstream can do with redacted thoughts.
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            let mut function_call = json!({
                                "id": id,
                                "name": crate::proxy::tool_names::sanitize_tool_name(name),
                                "args": input,
                            });
                            // The client strips thoughtSignature as an
                            // unknown field; refill from the cache.
                            if let Some(signature) = SignatureCache::global().get(id) {
                                function_call["thoughtSignature"] = json!(signature);
                            } else if thinking {
                                function_call["thoughtSignature"] =
                                    json!(SKIP_SIGNATURE_SENTINEL);
                            }
                            parts.push(json!({ "functionCall": function_call }));
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            let name = call_names
                                .get(tool_use_id)
                                .cloned()
                                .unwrap_or_else(|| "tool".to_string());
                            parts.push(json!({
                                "functionResponse": {
                                    "id": tool_use_id,
                                    "name": crate::proxy::tool_names::sanitize_tool_name(&name),
                                    "response": { "output": tool_result_output(content) },
                                }
                            }));
                        }
                    }
                }
            }
        }

        if parts.is_empty() {
            continue;
        }
        if let Some(last) = contents.last_mut() {
            if last["role"] == role {
                if let Some(dst) = last["parts"].as_array_mut() {
                    dst.extend(parts.iter().cloned());
                    continue;
                }
            }
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    if contents.is_empty() {
        return Err(AppError::Translation(
            "request carries no translatable messages".to_string(),
        ));
    }

    let mut generation_config = json!({});
    if let Some(max) = cap_max_output_tokens(model, request.max_tokens) {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        generation_config["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        generation_config["topP"] = json!(p);
    }
    if let Some(k) = request.top_k {
        generation_config["topK"] = json!(k);
    }
    if let Some(stops) = request.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
        generation_config["stopSequences"] = json!(stops);
    }
    if thinking {
        let budget = request
            .thinking
            .as_ref()
            .and_then(|t| t.budget_tokens)
            .unwrap_or(24_576);
        generation_config["thinkingConfig"] = json!({
            "includeThoughts": true,
            "thinkingBudget": budget,
        });
    }

    let mut inner = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if let Some(system) = &request.system {
        let text = system.joined_text();
        if !text.is_empty() {
            inner["systemInstruction"] = json!({ "parts": [{ "text": text }] });
        }
    }

    let declarations = parse_tool_declarations(request.tools.as_deref().unwrap_or(&[]));
    if let Some((native_tools, tool_config)) =
        tools::build_native_tools(&declarations, &session_id, model)
    {
        inner["tools"] = native_tools;
        inner["toolConfig"] = tool_config;
    }

    Ok((inner, session_id))
}

fn parse_tool_declarations(raw: &[Value]) -> Vec<ToolDeclaration> {
    raw.iter()
        // The web-search server tool is handled locally, never forwarded.
        .filter(|t| !tools::is_web_search_tool(t))
        .filter_map(|tool| {
            let name = tool.get("name").and_then(|v| v.as_str())?;
            Some(ToolDeclaration {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                parameters: tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
        })
        .collect()
}
