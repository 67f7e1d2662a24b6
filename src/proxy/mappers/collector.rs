use futures::StreamExt;

use crate::proxy::mappers::native::{Candidate, CandidateContent, NativeResponse, Part};
use crate::proxy::mappers::sse::{parse_upstream_sse, SseItem, UpstreamByteStream};

// Thinking models always stream; the unary path drains the SSE internally and
// consolidates it into one native response. Adjacent text/thought fragments
// merge, function calls accumulate, the last finish reason and usage win.
pub async fn collect_native(upstream: UpstreamByteStream) -> Result<NativeResponse, String> {
    let mut events = parse_upstream_sse(upstream);

    let mut parts: Vec<Part> = Vec::new();
    let mut finish_reason: Option<String> = None;
    let mut usage = None;
    let mut model_version = None;
    let mut response_id = None;

    while let Some(item) = events.next().await {
        let value = match item? {
            SseItem::Data(v) => v,
            SseItem::Done => break,
            SseItem::Ping => continue,
        };
        let Some(chunk) = NativeResponse::parse(&value) else {
            continue;
        };
        if chunk.model_version.is_some() {
            model_version = chunk.model_version;
        }
        if chunk.response_id.is_some() {
            response_id = chunk.response_id;
        }
        if chunk.usage_metadata.is_some() {
            usage = chunk.usage_metadata;
        }
        if let Some(candidate) = chunk.candidates.into_iter().next() {
            if candidate.finish_reason.is_some() {
                finish_reason = candidate.finish_reason;
            }
            for part in candidate.content.parts {
                merge_part(&mut parts, part);
            }
        }
    }

    Ok(NativeResponse {
        candidates: vec![Candidate {
            content: CandidateContent { parts },
            finish_reason,
        }],
        usage_metadata: usage,
        model_version,
        response_id,
    })
}

fn merge_part(parts: &mut Vec<Part>, incoming: Part) {
    if let Some(last) = parts.last_mut() {
        match (last, &incoming) {
            (
                Part::Text {
                    text: existing,
                    thought_signature,
                },
                Part::Text {
                    text: new,
                    thought_signature: new_sig,
                },
            ) => {
                existing.push_str(new);
                if new_sig.is_some() {
                    *thought_signature = new_sig.clone();
                }
                return;
            }
            (
                Part::Thought {
                    text: existing,
                    thought_signature,
                    ..
                },
                Part::Thought {
                    text: new,
                    thought_signature: new_sig,
                    ..
                },
            ) => {
                existing.push_str(new);
                if new_sig.is_some() {
                    *thought_signature = new_sig.clone();
                }
                return;
            }
            _ => {}
        }
    }
    parts.push(incoming);
}
