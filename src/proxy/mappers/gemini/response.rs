use std::pin::Pin;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::proxy::ids;
use crate::proxy::mappers::sse::{parse_upstream_sse, SseItem, UpstreamByteStream};
use crate::proxy::mappers::tools::restore_tool_name;
use crate::proxy::signature_cache::SignatureCache;

// Gemini outbound is a pass-through with bookkeeping: unwrap the native
// envelope, restore sanitized tool names, cache thought signatures against
// their call ids, and make sure every call carries an id.
pub fn rewrite_response(value: &Value, model: &str, session_id: &str) -> Value {
    let mut out = value.get("response").unwrap_or(value).clone();

    let Some(candidates) = out.get_mut("candidates").and_then(|c| c.as_array_mut()) else {
        return out;
    };
    for candidate in candidates.iter_mut() {
        let Some(parts) = candidate
            .get_mut("content")
            .and_then(|c| c.get_mut("parts"))
            .and_then(|p| p.as_array_mut())
        else {
            continue;
        };
        for part in parts.iter_mut() {
            let outer_sig = part
                .get("thoughtSignature")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string());
            let Some(call) = part.get_mut("functionCall").and_then(|c| c.as_object_mut()) else {
                continue;
            };
            let call_id = match call.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => {
                    let id = ids::tool_call_id();
                    call.insert("id".to_string(), json!(id));
                    id
                }
            };
            let signature = call
                .get("thoughtSignature")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
                .or(outer_sig);
            if let Some(sig) = signature {
                SignatureCache::global().put(&call_id, sig);
            }
            if let Some(name) = call.get("name").and_then(|n| n.as_str()) {
                let original = restore_tool_name(session_id, model, name);
                if original != name {
                    call.insert("name".to_string(), json!(original));
                }
            }
        }
    }
    out
}

// Streaming pass-through. `alt=sse` keeps SSE framing; otherwise the stream
// degrades to newline-delimited JSON.
pub fn create_stream(
    upstream: UpstreamByteStream,
    model: String,
    session_id: String,
    sse_framing: bool,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    Box::pin(stream! {
        let mut events = parse_upstream_sse(upstream);
        while let Some(item) = events.next().await {
            match item {
                Ok(SseItem::Data(value)) => {
                    let rewritten = rewrite_response(&value, &model, &session_id);
                    if sse_framing {
                        yield Ok(Bytes::from(format!("data: {}\n\n", rewritten)));
                    } else {
                        yield Ok(Bytes::from(format!("{}\n", rewritten)));
                    }
                }
                Ok(SseItem::Done) => break,
                Ok(SseItem::Ping) => {
                    if sse_framing {
                        yield Ok(Bytes::from(": ping\n\n"));
                    }
                }
                Err(e) => {
                    let frame = json!({"error": {"message": e, "code": 502}});
                    if sse_framing {
                        yield Ok(Bytes::from(format!("data: {}\n\n", frame)));
                    } else {
                        yield Ok(Bytes::from(format!("{}\n", frame)));
                    }
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::tool_names::ToolNameCache;

    #[test]
    fn envelope_is_unwrapped_and_names_restored() {
        ToolNameCache::global().set_mapping(
            "sess-gem-out",
            "gemini-2.5-pro",
            "do_it",
            "do.it",
        );
        let value = json!({
            "response": {
                "candidates": [{"content": {"parts": [
                    {"functionCall": {"id": "call_g1", "name": "do_it", "args": {}}}
                ]}, "finishReason": "STOP"}]
            }
        });
        let out = rewrite_response(&value, "gemini-2.5-pro", "sess-gem-out");
        assert!(out.get("response").is_none());
        assert_eq!(
            out["candidates"][0]["content"]["parts"][0]["functionCall"]["name"],
            "do.it"
        );
    }

    #[test]
    fn outbound_signatures_are_cached_by_call_id() {
        let sig = "p".repeat(64);
        let value = json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"id": "call_gem_sig", "name": "t", "args": {},
                                  "thoughtSignature": sig}}
            ]}}]
        });
        rewrite_response(&value, "gemini-3-pro", "sess");
        assert_eq!(
            SignatureCache::global().get("call_gem_sig"),
            Some("p".repeat(64))
        );
    }

    #[test]
    fn missing_ids_are_filled_on_the_way_out() {
        let value = json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "t", "args": {}}}
            ]}}]
        });
        let out = rewrite_response(&value, "gemini-2.5-pro", "sess");
        let id = out["candidates"][0]["content"]["parts"][0]["functionCall"]["id"]
            .as_str()
            .unwrap();
        assert!(id.starts_with("call_"));
    }

    #[tokio::test]
    async fn stream_rewrites_each_event_in_order() {
        use async_stream::stream as mock_stream;
        let upstream: UpstreamByteStream = Box::pin(mock_stream! {
            yield Ok(Bytes::from(
                "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}}\n\n",
            ));
            yield Ok(Bytes::from(
                "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]},\"finishReason\":\"STOP\"}]}}\n\n",
            ));
        });
        let frames: Vec<String> = create_stream(upstream, "gemini-2.5-pro".into(), "s".into(), true)
            .filter_map(|r| async move { r.ok() })
            .map(|b| String::from_utf8_lossy(&b).to_string())
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("data: "));
        assert!(frames[0].contains("\"a\""));
        assert!(frames[1].contains("STOP"));
    }

    #[tokio::test]
    async fn ndjson_mode_drops_sse_framing() {
        use async_stream::stream as mock_stream;
        let upstream: UpstreamByteStream = Box::pin(mock_stream! {
            yield Ok(Bytes::from(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]}}]}\n\n",
            ));
        });
        let frames: Vec<String> = create_stream(upstream, "gemini-2.5-pro".into(), "s".into(), false)
            .filter_map(|r| async move { r.ok() })
            .map(|b| String::from_utf8_lossy(&b).to_string())
            .collect()
            .await;
        assert!(!frames[0].starts_with("data: "));
        assert!(frames[0].ends_with('\n'));
    }
}
