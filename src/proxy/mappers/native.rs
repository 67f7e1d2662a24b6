use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// The single upstream ("Antigravity") shape every public API maps onto.
// Requests are built as JSON values; responses are parsed into these types.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

// Tagged union of content fragments. Variant order matters: serde tries them
// top to bottom, and the thought variant must win over plain text whenever
// the `thought` field is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Part {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Thought {
        text: String,
        thought: bool,
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },
    Text {
        text: String,
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            thought_signature: None,
        }
    }

    pub fn thought(text: impl Into<String>, signature: Option<String>) -> Self {
        Part::Thought {
            text: text.into(),
            thought: true,
            thought_signature: signature,
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Part::Thought { thought: true, .. })
    }

    // The signature may sit on the part or inside the call; prefer the inner
    // one when both exist.
    pub fn signature(&self) -> Option<&str> {
        match self {
            Part::FunctionCall {
                function_call,
                thought_signature,
            } => function_call
                .thought_signature
                .as_deref()
                .or(thought_signature.as_deref()),
            Part::Thought {
                thought_signature, ..
            }
            | Part::Text {
                thought_signature, ..
            } => thought_signature.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: CandidateContent,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NativeResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
}

impl NativeResponse {
    // Upstream wraps SSE payloads in a `{response: …}` envelope; unary
    // responses may or may not carry it.
    pub fn parse(value: &Value) -> Option<NativeResponse> {
        let unwrapped = value.get("response").unwrap_or(value);
        serde_json::from_value(unwrapped.clone()).ok()
    }

    pub fn first_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

// Finish-reason projections per public family.
pub fn finish_reason_openai(native: &str, used_tool: bool) -> &'static str {
    if used_tool {
        return "tool_calls";
    }
    match native {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "TOOL_USE" | "FUNCTION_CALL" => "tool_calls",
        "SAFETY" => "content_filter",
        _ => "stop",
    }
}

pub fn finish_reason_claude(native: &str, used_tool: bool) -> &'static str {
    if used_tool {
        return "tool_use";
    }
    match native {
        "STOP" => "end_turn",
        "MAX_TOKENS" => "max_tokens",
        "TOOL_USE" | "FUNCTION_CALL" => "tool_use",
        "SAFETY" => "stop_sequence",
        _ => "end_turn",
    }
}

// Assembles the outer native request envelope around a translated inner body.
pub fn wrap_envelope(project: &str, model: &str, session_id: &str, inner: Value) -> Value {
    let mut request = inner;
    if let Some(obj) = request.as_object_mut() {
        obj.insert("sessionId".to_string(), json!(session_id));
    }
    json!({
        "project": project,
        "requestId": crate::proxy::ids::request_id(),
        "model": model,
        "userAgent": crate::constants::USER_AGENT.as_str(),
        "request": request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_union_deserializes_each_variant() {
        let parts: Vec<Part> = serde_json::from_value(json!([
            {"text": "hello"},
            {"text": "pondering", "thought": true, "thoughtSignature": "sig"},
            {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
            {"functionCall": {"id": "call_1", "name": "search", "args": {"q": "x"}}},
            {"functionResponse": {"id": "call_1", "name": "search", "response": {"output": "y"}}}
        ]))
        .unwrap();

        assert!(matches!(parts[0], Part::Text { .. }));
        assert!(parts[1].is_thought());
        assert!(matches!(parts[2], Part::InlineData { .. }));
        assert!(matches!(parts[3], Part::FunctionCall { .. }));
        assert!(matches!(parts[4], Part::FunctionResponse { .. }));
    }

    #[test]
    fn thought_variant_wins_over_text_when_flag_present() {
        let part: Part =
            serde_json::from_value(json!({"text": "mull", "thought": true})).unwrap();
        assert!(part.is_thought());
        let part: Part = serde_json::from_value(json!({"text": "plain"})).unwrap();
        assert!(!part.is_thought());
    }

    #[test]
    fn signature_prefers_inner_function_call_field() {
        let part: Part = serde_json::from_value(json!({
            "functionCall": {"name": "t", "args": {}, "thoughtSignature": "inner"},
            "thoughtSignature": "outer"
        }))
        .unwrap();
        assert_eq!(part.signature(), Some("inner"));

        let part: Part = serde_json::from_value(json!({
            "functionCall": {"name": "t", "args": {}},
            "thoughtSignature": "outer"
        }))
        .unwrap();
        assert_eq!(part.signature(), Some("outer"));
    }

    #[test]
    fn parse_unwraps_sse_envelope() {
        let wrapped = json!({
            "response": {
                "candidates": [{"content": {"parts": [{"text": "hi"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
            }
        });
        let parsed = NativeResponse::parse(&wrapped).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));

        let bare = wrapped.get("response").unwrap().clone();
        let parsed = NativeResponse::parse(&bare).unwrap();
        assert_eq!(parsed.usage_metadata.unwrap().prompt_token_count, Some(3));
    }

    #[test]
    fn finish_reason_tables_match_both_families() {
        assert_eq!(finish_reason_openai("STOP", false), "stop");
        assert_eq!(finish_reason_openai("MAX_TOKENS", false), "length");
        assert_eq!(finish_reason_openai("SAFETY", false), "content_filter");
        assert_eq!(finish_reason_openai("STOP", true), "tool_calls");
        assert_eq!(finish_reason_claude("STOP", false), "end_turn");
        assert_eq!(finish_reason_claude("MAX_TOKENS", false), "max_tokens");
        assert_eq!(finish_reason_claude("SAFETY", false), "stop_sequence");
        assert_eq!(finish_reason_claude("FUNCTION_CALL", false), "tool_use");
    }

    #[test]
    fn envelope_carries_ids_and_session() {
        let wrapped = wrap_envelope("proj-1", "gemini-3-pro", "abc123", json!({"contents": []}));
        assert_eq!(wrapped["project"], "proj-1");
        assert_eq!(wrapped["model"], "gemini-3-pro");
        assert_eq!(wrapped["request"]["sessionId"], "abc123");
        assert!(wrapped["requestId"]
            .as_str()
            .unwrap()
            .starts_with("agent-"));
    }
}
