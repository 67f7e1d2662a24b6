use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use dashmap::DashMap;

use crate::constants::{MIN_SIGNATURE_LENGTH, SIGNATURE_SWEEP_INTERVAL, SIGNATURE_TTL};

#[derive(Clone, Debug)]
struct CacheEntry {
    signature: String,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > SIGNATURE_TTL
    }
}

struct Inner {
    entries: DashMap<String, CacheEntry>,
    sweeper_running: AtomicBool,
}

// tool_use_id → opaque thought signature. Thinking models refuse tool-call
// history without the signature, and Anthropic-style clients strip it as an
// unknown field, so the gateway remembers it for the round trip.
pub struct SignatureCache {
    inner: Arc<Inner>,
}

impl SignatureCache {
    fn new() -> Self {
        SignatureCache {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                sweeper_running: AtomicBool::new(false),
            }),
        }
    }

    pub fn global() -> &'static SignatureCache {
        static INSTANCE: OnceLock<SignatureCache> = OnceLock::new();
        INSTANCE.get_or_init(SignatureCache::new)
    }

    // Signatures below the minimum length are placeholders, not worth keeping.
    pub fn put(&self, tool_use_id: &str, signature: String) {
        if signature.len() < MIN_SIGNATURE_LENGTH {
            return;
        }
        tracing::debug!(
            "[SignatureCache] Caching signature for {} (len={})",
            tool_use_id,
            signature.len()
        );
        self.inner.entries.insert(
            tool_use_id.to_string(),
            CacheEntry {
                signature,
                inserted_at: Instant::now(),
            },
        );
        self.maybe_start_sweeper();
    }

    // Prunes expired entries on read.
    pub fn get(&self, tool_use_id: &str) -> Option<String> {
        let entry = self.inner.entries.get(tool_use_id)?;
        if entry.is_expired() {
            drop(entry);
            self.inner.entries.remove(tool_use_id);
            return None;
        }
        Some(entry.signature.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    // The sweeper self-stops once the map empties and restarts on the next
    // insertion, so an idle gateway holds no ticking task.
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
                tokio::time::sleep(SIGNATURE_SWEEP_INTERVAL).await;
                let before = inner.entries.len();
                inner.entries.retain(|_, v| !v.is_expired());
                let after = inner.entries.len();
                if before != after {
                    tracing::debug!("[SignatureCache] Sweep: {} -> {} entries", before, after);
                }
                if inner.entries.is_empty() {
                    inner.sweeper_running.store(false, Ordering::SeqCst);
                    tracing::debug!("[SignatureCache] Empty, sweeper stopped");
                    break;
                }
            }
        });
    }

    #[cfg(test)]
    fn put_aged(&self, tool_use_id: &str, signature: String, age: std::time::Duration) {
        let inserted_at = Instant::now()
            .checked_sub(age)
            .unwrap_or_else(Instant::now);
        self.inner.entries.insert(
            tool_use_id.to_string(),
            CacheEntry {
                signature,
                inserted_at,
            },
        );
    }
}
