use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use super::models::{OpenAIContent, OpenAIContentBlock, OpenAIRequest};
use crate::constants::SKIP_SIGNATURE_SENTINEL;
use crate::error::{AppError, AppResult};
use crate::proxy::mappers::tools::{self, ToolDeclaration};
use crate::proxy::model_family::{
    cap_max_output_tokens, supports_thinking, thinking_budget_for_effort,
};
use crate::proxy::session::session_id_from_text;
use crate::proxy::signature_cache::SignatureCache;

static DATA_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data:image/(\w+);base64,(.*)$").expect("invalid image regex"));

// OpenAI Chat Completions → native. Returns the inner native request (the
// handler wraps the project/model envelope) plus the derived session id.
pub fn transform_request(request: &OpenAIRequest, model: &str) -> AppResult<(Value, String)> {
    let session_id = session_id_from_text(request.first_user_text().as_deref());
    let thinking = supports_thinking(model);

    // Leading system/developer messages collapse into the system instruction.
    let system_text: Vec<String> = request
        .messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "developer")
        .filter_map(|m| m.content.as_ref().map(|c| c.joined_text()))
        .filter(|t| !t.is_empty())
        .collect();

    // tool_call_id → declared function name, for functionResponse naming.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for message in &request.messages {
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                call_names.insert(call.id.clone(), call.function.name.clone());
            }
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for message in &request.messages {
        if message.role == "system" || message.role == "developer" {
            continue;
        }
        let role = match message.role.as_str() {
            "assistant" => "model",
            _ => "user",
        };
        let mut parts: Vec<Value> = Vec::new();

        if let Some(reasoning) = message
            .reasoning_content
            .as_ref()
            .filter(|r| !r.is_empty())
        {
            parts.push(json!({ "text": reasoning, "thought": true }));
        }

        let is_tool_result = message.role == "tool" || message.role == "function";
        if !is_tool_result {
            match &message.content {
                Some(OpenAIContent::Text(text)) if !text.is_empty() => {
                    parts.push(json!({ "text": text }));
                }
                Some(OpenAIContent::Blocks(blocks)) => {
                    for block in blocks {
                        match block {
                            OpenAIContentBlock::Text { text } => {
                                parts.push(json!({ "text": text }));
                            }
                            OpenAIContentBlock::ImageUrl { image_url } => {
                                if let Some(caps) = DATA_IMAGE.captures(&image_url.url) {
                                    parts.push(json!({
                                        "inlineData": {
                                            "mimeType": format!("image/{}", &caps[1]),
                                            "data": &caps[2],
                                        }
                                    }));
                                } else {
                                    tracing::debug!(
                                        "[OpenAI-Request] Skipping non-data image URL"
                                    );
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(calls) = &message.tool_calls {
            for call in calls {
                let args: Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
                let mut function_call = json!({
                    "id": call.id,
                    "name": call.function.name,
                    "args": args,
                });
                // Reattach the signature the client stripped; the sentinel
                // keeps thinking models from rejecting bare calls.
                if let Some(signature) = SignatureCache::global().get(&call.id) {
                    function_call["thoughtSignature"] = json!(signature);
                } else if thinking {
                    function_call["thoughtSignature"] = json!(SKIP_SIGNATURE_SENTINEL);
                }
                parts.push(json!({ "functionCall": function_call }));
            }
        }

        if is_tool_result {
            let call_id = message.tool_call_id.clone().unwrap_or_default();
            let name = call_names
                .get(&call_id)
                .cloned()
                .or_else(|| message.name.clone())
                .unwrap_or_else(|| "tool".to_string());
            let output = message
                .content
                .as_ref()
                .map(|c| c.joined_text())
                .unwrap_or_default();
            parts.push(json!({
                "functionResponse": {
                    "id": call_id,
                    "name": name,
                    "response": { "output": output },
                }
            }));
        }

        if parts.is_empty() {
            continue;
        }
        // Adjacent same-role turns merge; upstream requires strict
        // user/model alternation.
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
    if let Some(max) = cap_max_output_tokens(model, request.effective_max_tokens()) {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        generation_config["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        generation_config["topP"] = json!(p);
    }
    let stops = request.stop_sequences();
    if !stops.is_empty() {
        generation_config["stopSequences"] = json!(stops);
    }
    if thinking {
        let budget = request
            .reasoning_effort
            .as_deref()
            .and_then(thinking_budget_for_effort)
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
    if !system_text.is_empty() {
        inner["systemInstruction"] = json!({
            "parts": [{ "text": system_text.join("\n\n") }]
        });
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
        .filter(|t| !tools::is_web_search_tool(t))
        .filter_map(|tool| {
            let function = tool.get("function").unwrap_or(tool);
            let name = function.get("name").and_then(|v| v.as_str())?;
            Some(ToolDeclaration {
                name: name.to_string(),
                description: function
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                parameters: function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: Value) -> OpenAIRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn system_messages_collapse_into_system_instruction() {
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "system", "content": "be kind"},
                {"role": "user", "content": "hi"}
            ]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro").unwrap();
        assert_eq!(
            inner["systemInstruction"]["parts"][0]["text"],
            "be terse\n\nbe kind"
        );
        assert_eq!(inner["contents"].as_array().unwrap().len(), 1);
        assert_eq!(inner["contents"][0]["role"], "user");
    }

    #[test]
    fn roles_map_to_user_and_model() {
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": "a"},
                {"role": "user", "content": "q2"}
            ]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro").unwrap();
        let contents = inner["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
    }

    #[test]
    fn data_url_images_become_inline_data() {
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,QUJD"}}
            ]}]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro").unwrap();
        let parts = inner["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "look");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "QUJD");
    }

    #[test]
    fn tool_calls_and_results_pair_up() {
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "user", "content": "run it"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_9", "type": "function",
                     "function": {"name": "runner", "arguments": "{\"x\":1}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_9", "content": "done"}
            ]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro").unwrap();
        let contents = inner["contents"].as_array().unwrap();
        let call = &contents[1]["parts"][0]["functionCall"];
        assert_eq!(call["id"], "call_9");
        assert_eq!(call["name"], "runner");
        assert_eq!(call["args"]["x"], 1);
        let response = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(response["id"], "call_9");
        assert_eq!(response["name"], "runner");
        assert_eq!(response["response"]["output"], "done");
    }

    #[test]
    fn thinking_model_gets_sentinel_when_no_cached_signature() {
        let req = parse(json!({
            "model": "gemini-2.5-pro-thinking",
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_fresh_sentinel", "type": "function",
                     "function": {"name": "t", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_fresh_sentinel", "content": "ok"}
            ]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro-thinking").unwrap();
        let call = &inner["contents"][1]["parts"][0]["functionCall"];
        assert_eq!(call["thoughtSignature"], SKIP_SIGNATURE_SENTINEL);
    }

    #[test]
    fn cached_signature_is_refilled_on_the_way_in() {
        let signature = "z".repeat(64);
        SignatureCache::global().put("call_refill_openai", signature.clone());

        let req = parse(json!({
            "model": "gemini-2.5-pro-thinking",
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_refill_openai", "type": "function",
                     "function": {"name": "t", "arguments": "{}"}}
                ]}
            ]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro-thinking").unwrap();
        let call = &inner["contents"][1]["parts"][0]["functionCall"];
        assert_eq!(call["thoughtSignature"], signature);
    }

    #[test]
    fn reasoning_effort_maps_to_thinking_budget() {
        let req = parse(json!({
            "model": "gemini-2.5-pro-thinking",
            "messages": [{"role": "user", "content": "hi"}],
            "reasoning_effort": "high"
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro-thinking").unwrap();
        assert_eq!(
            inner["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            32_000
        );
        assert_eq!(
            inner["generationConfig"]["thinkingConfig"]["includeThoughts"],
            true
        );
    }

    #[test]
    fn gemini_output_tokens_are_capped_inbound() {
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 500000
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro").unwrap();
        assert_eq!(inner["generationConfig"]["maxOutputTokens"], 16_384);
    }

    #[test]
    fn session_id_is_stable_for_identical_first_user_text() {
        let body = json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "same text"}]
        });
        let (_, sid1) = transform_request(&parse(body.clone()), "gemini-2.5-pro").unwrap();
        let (_, sid2) = transform_request(&parse(body), "gemini-2.5-pro").unwrap();
        assert_eq!(sid1, sid2);
    }

    #[test]
    fn empty_message_list_is_a_translation_error() {
        let req = parse(json!({"model": "gemini-2.5-pro", "messages": []}));
        assert!(matches!(
            transform_request(&req, "gemini-2.5-pro"),
            Err(AppError::Translation(_))
        ));
    }

    #[test]
    fn web_search_tools_are_stripped_from_declarations() {
        let req = parse(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"type": "function", "function": {"name": "real_tool", "parameters": {"type": "object"}}},
                {"type": "web_search_20250305", "name": "web_search"}
            ]
        }));
        let (inner, _) = transform_request(&req, "gemini-2.5-pro").unwrap();
        let decls = inner["tools"][0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0]["name"], "real_tool");
        assert_eq!(
            inner["toolConfig"]["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }
}
