//! Time-bounded store for upstream metadata responses.
//!
//! Entries are immutable once written and are never handed out past their
//! time-to-live. Expired entries are dropped lazily on read, in bulk by
//! [`ResponseCache::sweep`], or when room is needed for a new key.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

/// Builds the cache key for an upstream sub-path plus forwarded query pairs.
/// Pairs keep the order they arrived in, so the same request always maps to
/// the same key while different pages or filters never collide.
pub fn cache_key(path: &str, query: &[(String, String)]) -> String {
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();
    format!("{}?{}", path.trim_matches('/'), encoded)
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<Arc<Value>> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !self.is_expired(entry, now) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Arc<Value> {
        self.set_at(key, value, Instant::now())
    }

    /// Stores `value` with a fresh time-to-live starting at `now`, replacing
    /// any previous entry for the key.
    pub fn set_at(&self, key: impl Into<String>, value: Value, now: Instant) -> Arc<Value> {
        let key = key.into();
        let value = Arc::new(value);
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    tracing::debug!(key = %oldest, "evicting oldest cache entry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                stored_at: now,
            },
        );
        value
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.stored_at) >= self.ttl
    }
}
