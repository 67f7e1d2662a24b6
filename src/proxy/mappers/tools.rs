use serde_json::{json, Value};

use crate::proxy::tool_names::{sanitize_tool_name, ToolNameCache};

// Anthropic's server-side web-search tool is handled by a local shim, never
// forwarded upstream.
pub const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

// Normalizes one declaration: the name is sanitized and, when that changed
// it, the mapping is recorded so outbound calls can be rewritten back. The
// cache key uses the normalized model so inbound and outbound agree even when
// the client sends a date-pinned alias.
pub fn normalize_declaration(
    decl: &ToolDeclaration,
    session_id: &str,
    model: &str,
) -> Value {
    let safe_name = sanitize_tool_name(&decl.name);
    if safe_name != decl.name {
        tracing::debug!(
            "[Tools] Sanitized tool name '{}' -> '{}'",
            decl.name,
            safe_name
        );
        let model_key = crate::proxy::model_family::normalize_model(model);
        ToolNameCache::global().set_mapping(session_id, &model_key, &safe_name, &decl.name);
    }

    let mut out = json!({
        "name": safe_name,
        "parameters": normalize_schema(&decl.parameters),
    });
    if let Some(desc) = &decl.description {
        out["description"] = json!(desc);
    }
    out
}

// Builds the native `tools` + `toolConfig` sections. Returns None when no
// forwardable declarations remain.
pub fn build_native_tools(
    declarations: &[ToolDeclaration],
    session_id: &str,
    model: &str,
) -> Option<(Value, Value)> {
    if declarations.is_empty() {
        return None;
    }
    let decls: Vec<Value> = declarations
        .iter()
        .map(|d| normalize_declaration(d, session_id, model))
        .collect();

    let tools = json!([{ "functionDeclarations": decls }]);
    let tool_config = json!({
        "functionCallingConfig": { "mode": "VALIDATED" }
    });
    Some((tools, tool_config))
}

// Maps an outbound sanitized call name back to the client's original.
pub fn restore_tool_name(session_id: &str, model: &str, sanitized: &str) -> String {
    let model_key = crate::proxy::model_family::normalize_model(model);
    ToolNameCache::global()
        .get_original(session_id, &model_key, sanitized)
        .unwrap_or_else(|| sanitized.to_string())
}

// Keeps parameter schemas within what upstream accepts: object schemas get a
// type, and JSON-Schema keywords upstream rejects are dropped recursively.
pub fn normalize_schema(schema: &Value) -> Value {
    let mut cleaned = schema.clone();
    clean_schema_in_place(&mut cleaned);
    if !cleaned.is_object() {
        return json!({ "type": "object" });
    }
    if cleaned.get("type").is_none() {
        cleaned["type"] = json!("object");
    }
    cleaned
}

fn clean_schema_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in ["$schema", "additionalProperties", "exclusiveMaximum", "exclusiveMinimum"] {
                map.remove(key);
            }
            for v in map.values_mut() {
                clean_schema_in_place(v);
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                clean_schema_in_place(v);
            }
        }
        _ => {}
    }
}

pub fn is_web_search_tool(tool: &Value) -> bool {
    let names = ["web_search", "google_search", WEB_SEARCH_TOOL_TYPE];
    if let Some(t) = tool.get("type").and_then(|v| v.as_str()) {
        if names.contains(&t) {
            return true;
        }
    }
    if let Some(n) = tool.get("name").and_then(|v| v.as_str()) {
        if names.contains(&n) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str) -> ToolDeclaration {
        ToolDeclaration {
            name: name.to_string(),
            description: Some("does things".to_string()),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    #[test]
    fn sanitized_names_are_recorded_and_restorable() {
        let session = "sess-tools-1";
        let model = "gemini-3-pro";
        let normalized = normalize_declaration(&decl("my.tool!"), session, model);
        assert_eq!(normalized["name"], "my_tool");
        assert_eq!(restore_tool_name(session, model, "my_tool"), "my.tool!");
    }

    #[test]
    fn clean_names_skip_the_cache() {
        let session = "sess-tools-2";
        let normalized = normalize_declaration(&decl("plain_tool"), session, "m");
        assert_eq!(normalized["name"], "plain_tool");
        // Nothing recorded: restore falls through to the sanitized name.
        assert_eq!(restore_tool_name(session, "m", "plain_tool"), "plain_tool");
    }

    #[test]
    fn native_tools_force_validated_mode() {
        let (tools, config) =
            build_native_tools(&[decl("alpha")], "sess-tools-3", "gemini-3-pro").unwrap();
        assert!(tools[0]["functionDeclarations"].is_array());
        assert_eq!(config["functionCallingConfig"]["mode"], "VALIDATED");
    }

    #[test]
    fn empty_declaration_list_yields_no_tools() {
        assert!(build_native_tools(&[], "s", "m").is_none());
    }

    #[test]
    fn schema_normalization_fills_type_and_strips_meta() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "properties": {"q": {"type": "string", "additionalProperties": false}}
        });
        let cleaned = normalize_schema(&schema);
        assert_eq!(cleaned["type"], "object");
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned["properties"]["q"].get("additionalProperties").is_none());
    }

    #[test]
    fn non_object_schema_becomes_bare_object() {
        assert_eq!(normalize_schema(&json!(null)), json!({"type": "object"}));
    }

    #[test]
    fn web_search_tools_are_detected_by_type_or_name() {
        assert!(is_web_search_tool(&json!({"type": "web_search_20250305", "name": "web_search"})));
        assert!(is_web_search_tool(&json!({"name": "google_search"})));
        assert!(!is_web_search_tool(&json!({"name": "my_tool"})));
    }
}
