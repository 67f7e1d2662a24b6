use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_completion_tokens: Option<u64>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl OpenAIRequest {
    pub fn effective_max_tokens(&self) -> Option<u64> {
        self.max_completion_tokens.or(self.max_tokens)
    }

    pub fn stop_sequences(&self) -> Vec<String> {
        match &self.stop {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn first_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.as_ref())
            .map(|c| c.joined_text())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAIContent>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Blocks(Vec<OpenAIContentBlock>),
}

impl OpenAIContent {
    pub fn joined_text(&self) -> String {
        match self {
            OpenAIContent::Text(s) => s.clone(),
            OpenAIContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    OpenAIContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(default)]
    pub r#type: Option<String>,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIFunctionCall {
    pub name: String,
    // OpenAI serializes arguments as a JSON string.
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_parses_minimal_body() {
        let req: OpenAIRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!req.stream);
        assert_eq!(req.first_user_text().as_deref(), Some("hi"));
    }

    #[test]
    fn stop_accepts_string_or_array() {
        let req: OpenAIRequest = serde_json::from_value(json!({
            "model": "m", "messages": [], "stop": "END"
        }))
        .unwrap();
        assert_eq!(req.stop_sequences(), vec!["END".to_string()]);

        let req: OpenAIRequest = serde_json::from_value(json!({
            "model": "m", "messages": [], "stop": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(req.stop_sequences(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn content_blocks_join_text_fragments() {
        let content: OpenAIContent = serde_json::from_value(json!([
            {"type": "text", "text": "first"},
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
            {"type": "text", "text": "second"}
        ]))
        .unwrap();
        assert_eq!(content.joined_text(), "first second");
    }

    #[test]
    fn max_completion_tokens_takes_precedence() {
        let req: OpenAIRequest = serde_json::from_value(json!({
            "model": "m", "messages": [], "max_tokens": 100, "max_completion_tokens": 200
        }))
        .unwrap();
        assert_eq!(req.effective_max_tokens(), Some(200));
    }
}
