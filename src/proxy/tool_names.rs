use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::constants::{
    MAX_TOOL_NAME_LENGTH, TOOL_NAME_CACHE_LIMIT, TOOL_NAME_SWEEP_INTERVAL, TOOL_NAME_TTL,
};

// Upstream only accepts `[A-Za-z0-9_-]` tool names. Everything else becomes
// `_`, outer underscores are trimmed, an empty result becomes "tool", and the
// length is capped.
pub fn sanitize_tool_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('_');
    let mut result = if trimmed.is_empty() {
        "tool".to_string()
    } else {
        trimmed.to_string()
    };
    result.truncate(MAX_TOOL_NAME_LENGTH);
    result
}

#[derive(Clone, Debug)]
struct MappingEntry {
    original: String,
    inserted_at: Instant,
}

impl MappingEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > TOOL_NAME_TTL
    }
}

struct Inner {
    entries: DashMap<String, MappingEntry>,
    // Insertion order for FIFO eviction once the cap is hit.
    order: Mutex<VecDeque<String>>,
    sweeper_running: AtomicBool,
}

// (session, model, sanitized) → original tool name, so outbound function
// calls can be rewritten back to the name the client declared.
pub struct ToolNameCache {
    inner: Arc<Inner>,
}

fn key_for(session_id: &str, model: &str, sanitized: &str) -> String {
    format!("{}\u{1f}{}\u{1f}{}", session_id, model, sanitized)
}

impl ToolNameCache {
    fn new() -> Self {
        ToolNameCache {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                order: Mutex::new(VecDeque::new()),
                sweeper_running: AtomicBool::new(false),
            }),
        }
    }

    pub fn global() -> &'static ToolNameCache {
        static INSTANCE: OnceLock<ToolNameCache> = OnceLock::new();
        INSTANCE.get_or_init(ToolNameCache::new)
    }

    pub fn set_mapping(&self, session_id: &str, model: &str, sanitized: &str, original: &str) {
        let key = key_for(session_id, model, sanitized);
        let replaced = self
            .inner
            .entries
            .insert(
                key.clone(),
                MappingEntry {
                    original: original.to_string(),
                    inserted_at: Instant::now(),
                },
            )
            .is_some();

        {
            let mut order = self.inner.order.lock();
            if !replaced {
                order.push_back(key);
            }
            while self.inner.entries.len() > TOOL_NAME_CACHE_LIMIT {
                match order.pop_front() {
                    Some(oldest) => {
                        self.inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        self.maybe_start_sweeper();
    }

    pub fn get_original(&self, session_id: &str, model: &str, sanitized: &str) -> Option<String> {
        let key = key_for(session_id, model, sanitized);
        let entry = self.inner.entries.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.inner.entries.remove(&key);
            return None;
        }
        Some(entry.original.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
        self.inner.order.lock().clear();
    }

    fn maybe_start_sweeper(&self) {
        if self
            .inner
            .sweeper_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.sweeper_running.store(false, Ordering::SeqCst);
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            loop {
                tokio::time::sleep(TOOL_NAME_SWEEP_INTERVAL).await;
                inner.entries.retain(|_, v| !v.is_expired());
                inner
                    .order
                    .lock()
                    .retain(|k| inner.entries.contains_key(k));
                if inner.entries.is_empty() {
                    inner.sweeper_running.store(false, Ordering::SeqCst);
                    tracing::debug!("[ToolNameCache] Empty, sweeper stopped");
                    break;
                }
            }
        });
    }
}
