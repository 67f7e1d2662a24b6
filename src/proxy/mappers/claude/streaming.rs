use std::pin::Pin;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::proxy::ids;
use crate::proxy::mappers::native::{
    finish_reason_claude, NativeResponse, Part, UsageMetadata,
};
use crate::proxy::mappers::sse::{parse_upstream_sse, SseItem, UpstreamByteStream};
use crate::proxy::mappers::tools::restore_tool_name;
use crate::proxy::signature_cache::SignatureCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    None,
    Text,
    Thinking,
    ToolUse,
}

// Anthropic SSE block framing: every thinking/text/tool_use run is bracketed
// by content_block_start / content_block_stop, and a pending thought
// signature flushes as a signature_delta just before the block closes.
pub struct StreamingState {
    block_type: BlockType,
    block_index: usize,
    pub message_start_sent: bool,
    pub message_stop_sent: bool,
    used_tool: bool,
    pending_signature: Option<String>,
    model: String,
    session_id: String,
}

impl StreamingState {
    pub fn new(model: String, session_id: String) -> Self {
        StreamingState {
            block_type: BlockType::None,
            block_index: 0,
            message_start_sent: false,
            message_stop_sent: false,
            used_tool: false,
            pending_signature: None,
            model,
            session_id,
        }
    }

    fn emit(&self, event: &str, data: Value) -> Bytes {
        Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            event,
            serde_json::to_string(&data).unwrap_or_default()
        ))
    }

    fn emit_message_start(&mut self, native: &NativeResponse) -> Bytes {
        self.message_start_sent = true;
        let usage = native.usage_metadata.clone().unwrap_or_default();
        self.emit(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": native.response_id.clone().unwrap_or_else(ids::message_id),
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": usage.prompt_token_count.unwrap_or(0),
                        "output_tokens": 0,
                    }
                }
            }),
        )
    }

    fn start_block(&mut self, block_type: BlockType, content_block: Value) -> Vec<Bytes> {
        let mut chunks = self.end_block();
        chunks.push(self.emit(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block,
            }),
        ));
        self.block_type = block_type;
        chunks
    }

    fn end_block(&mut self) -> Vec<Bytes> {
        if self.block_type == BlockType::None {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        if self.block_type == BlockType::Thinking {
            if let Some(signature) = self.pending_signature.take() {
                chunks.push(self.delta(json!({
                    "type": "signature_delta",
                    "signature": signature,
                })));
            }
        }
        chunks.push(self.emit(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": self.block_index }),
        ));
        self.block_index += 1;
        self.block_type = BlockType::None;
        chunks
    }

    fn delta(&self, delta: Value) -> Bytes {
        self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": delta,
            }),
        )
    }

    fn process_part(&mut self, part: &Part) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        match part {
            Part::Thought {
                text,
                thought_signature,
                ..
            } => {
                if self.block_type != BlockType::Thinking {
                    chunks.extend(self.start_block(
                        BlockType::Thinking,
                        json!({ "type": "thinking", "thinking": "" }),
                    ));
                }
                chunks.push(self.delta(json!({
                    "type": "thinking_delta",
                    "thinking": text,
                })));
                if let Some(sig) = thought_signature {
                    self.pending_signature = Some(sig.clone());
                }
            }
            Part::Text { text, .. } => {
                if self.block_type != BlockType::Text {
                    chunks.extend(
                        self.start_block(BlockType::Text, json!({ "type": "text", "text": "" })),
                    );
                }
                chunks.push(self.delta(json!({ "type": "text_delta", "text": text })));
            }
            Part::FunctionCall { function_call, .. } => {
                self.used_tool = true;
                let call_id = function_call.id.clone().unwrap_or_else(ids::tool_call_id);
                if let Some(signature) = part.signature() {
                    SignatureCache::global().put(&call_id, signature.to_string());
                }
                let name = restore_tool_name(&self.session_id, &self.model, &function_call.name);
                chunks.extend(self.start_block(
                    BlockType::ToolUse,
                    json!({
                        "type": "tool_use",
                        "id": call_id,
                        "name": name,
                        "input": {},
                    }),
                ));
                chunks.push(self.delta(json!({
                    "type": "input_json_delta",
                    "partial_json": function_call.args.to_string(),
                })));
                chunks.extend(self.end_block());
            }
            _ => {}
        }
        chunks
    }

    fn emit_finish(
        &mut self,
        finish_reason: Option<&str>,
        usage: Option<&UsageMetadata>,
    ) -> Vec<Bytes> {
        let mut chunks = self.end_block();
        let stop_reason = finish_reason_claude(finish_reason.unwrap_or("STOP"), self.used_tool);
        let usage = usage.cloned().unwrap_or_default();
        chunks.push(self.emit(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": {
                    "input_tokens": usage.prompt_token_count.unwrap_or(0),
                    "output_tokens": usage.candidates_token_count.unwrap_or(0),
                }
            }),
        ));
        chunks.push(self.emit("message_stop", json!({ "type": "message_stop" })));
        self.message_stop_sent = true;
        chunks
    }
}

// Upstream SSE → Anthropic event stream.
pub fn create_stream(
    upstream: UpstreamByteStream,
    model: String,
    session_id: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    Box::pin(stream! {
        let mut events = parse_upstream_sse(upstream);
        let mut state = StreamingState::new(model, session_id);

        while let Some(item) = events.next().await {
            let value = match item {
                Ok(SseItem::Data(v)) => v,
                Ok(SseItem::Done) => break,
                Ok(SseItem::Ping) => {
                    yield Ok(Bytes::from(": ping\n\n"));
                    continue;
                }
                Err(e) => {
                    let frame = json!({
                        "type": "error",
                        "error": { "type": "overloaded_error", "message": e }
                    });
                    yield Ok(Bytes::from(format!(
                        "event: error\ndata: {}\n\n",
                        frame
                    )));
                    break;
                }
            };
            let Some(native) = NativeResponse::parse(&value) else {
                continue;
            };

            if !state.message_start_sent {
                yield Ok(state.emit_message_start(&native));
            }
            if let Some(candidate) = native.first_candidate() {
                for part in &candidate.content.parts {
                    for chunk in state.process_part(part) {
                        yield Ok(chunk);
                    }
                }
                if let Some(reason) = candidate.finish_reason.as_deref() {
                    for chunk in
                        state.emit_finish(Some(reason), native.usage_metadata.as_ref())
                    {
                        yield Ok(chunk);
                    }
                }
            }
        }

        // Truncated upstream: close any open block and stop the message so
        // the client is never left hanging.
        if state.message_start_sent && !state.message_stop_sent {
            for chunk in state.emit_finish(None, None) {
                yield Ok(chunk);
            }
        }
    })
}
