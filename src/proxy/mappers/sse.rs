use std::pin::Pin;

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;

pub type UpstreamByteStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

// Idle tick: emit a comment ping so proxies keep the connection open, and
// give up after enough silent ticks.
const IDLE_TICK: std::time::Duration = std::time::Duration::from_secs(30);
const MAX_SILENT_TICKS: u32 = 4;

#[derive(Debug, Clone)]
pub enum SseItem {
    // One parsed `data:` JSON payload.
    Data(Value),
    // Upstream said `data: [DONE]`.
    Done,
    // No bytes for a while; the consumer may emit a keep-alive frame.
    Ping,
}

// Decodes the upstream SSE framing: `data:`-prefixed lines carry JSON, a
// blank line terminates an event, everything else is ignored.
pub fn parse_upstream_sse(
    mut upstream: UpstreamByteStream,
) -> Pin<Box<dyn Stream<Item = Result<SseItem, String>> + Send>> {
    Box::pin(stream! {
        let mut buffer = BytesMut::new();
        let mut silent_ticks = 0u32;
        loop {
            match tokio::time::timeout(IDLE_TICK, upstream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    silent_ticks = 0;
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        let Ok(line) = std::str::from_utf8(&line_raw) else {
                            continue;
                        };
                        let line = line.trim();
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let payload = payload.trim();
                        if payload.is_empty() {
                            continue;
                        }
                        if payload == "[DONE]" {
                            yield Ok(SseItem::Done);
                            continue;
                        }
                        match serde_json::from_str::<Value>(payload) {
                            Ok(value) => yield Ok(SseItem::Data(value)),
                            Err(e) => {
                                tracing::debug!("[SSE] Skipping unparsable payload: {}", e);
                            }
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    yield Err(format!("upstream stream error: {}", e));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    silent_ticks += 1;
                    if silent_ticks >= MAX_SILENT_TICKS {
                        yield Err("upstream idle timeout".to_string());
                        break;
                    }
                    yield Ok(SseItem::Ping);
                }
            }
        }
    })
}
