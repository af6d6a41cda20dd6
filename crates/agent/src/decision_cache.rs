//! Short-lived memo of planning decisions.
//!
//! Asking the same thing against the same catalogs and backend within a
//! few minutes reuses the earlier decision instead of another model call.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};
use stepwise_config::AgentConfig;
use stepwise_core::decision::Decision;
use stepwise_core::provider::AskOptions;

pub const DEFAULT_TTL: Duration = Duration::from_secs(180);
pub const DEFAULT_MAX_ENTRIES: usize = 64;

struct Entry {
    stored: Instant,
    decision: Decision,
}

pub struct DecisionCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::with_limits(config.decision_cache_ttl(), config.decision_cache_max_entries)
    }

    /// Cache key over everything that shapes a decision.
    ///
    /// Text parts are trimmed; provider, model and base URL are compared
    /// case-insensitively and without a trailing slash.
    pub fn key(
        prompt: &str,
        unit_catalog: &str,
        tool_catalog: &str,
        options: &AskOptions,
        env_context: &str,
    ) -> String {
        let provider = options.provider.trim().to_ascii_lowercase();
        let model = options.model.trim().to_ascii_lowercase();
        let base_url = options.base_url.trim().trim_end_matches('/').to_ascii_lowercase();
        let parts = [
            prompt.trim(),
            unit_catalog.trim(),
            tool_catalog.trim(),
            provider.as_str(),
            model.as_str(),
            base_url.as_str(),
            env_context.trim(),
        ];

        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f_u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// A clone of the live entry for `key`. Expired entries are removed.
    pub fn get(&self, key: &str, now: Instant) -> Option<Decision> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = entries
            .get(key)
            .map(|e| now.saturating_duration_since(e.stored) <= self.ttl)?;
        if !fresh {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|e| e.decision.clone())
    }

    pub fn set(&self, key: &str, decision: &Decision, now: Instant) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).put(
            key.to_string(),
            Entry {
                stored: now,
                decision: decision.clone(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new()
    }
}
