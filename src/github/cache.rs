//! Bounded in-memory HTTP response cache (spec §4.2, §3).
//!
//! The tarball-key exclusion is a non-negotiable invariant (spec §9), not
//! a heuristic: tarball redirects would otherwise consume unbounded
//! memory, so `set` silently drops any key that mentions `.tar.gz` or
//! `/tarball/`.

use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

fn is_tarball_key(key: &str) -> bool {
    key.contains(".tar.gz") || key.contains("/tarball/")
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).cloned()
    }

    /// No-op when `key` is a tarball URL.
    pub async fn set(&self, key: String, value: Vec<u8>) {
        if is_tarball_key(&key) {
            tracing::debug!(key, "refusing to cache tarball response");
            return;
        }
        self.entries.write().await.insert(key, value);
    }

    pub async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Emitted once per reconciliation pass (spec §4.8 step 5).
    pub async fn log_size(&self) {
        let len = self.entries.read().await.len();
        tracing::info!(cache_entries = len, "response cache size");
    }
}
