//! Per-session state store.
//!
//! Entries are keyed by `"{sid}:{key}"` in a pluggable expiring cache. Every
//! write refreshes the entry's TTL; all entries of a session are removed when
//! the session closes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a state entry.
pub const DEFAULT_STATE_EXPIRE: Duration = Duration::from_secs(24 * 60 * 60);

/// Thread-safe expiring key-value cache backing [`State`].
///
/// Implementations synchronize internally; the router adds no locking.
pub trait StateCache: Send + Sync {
    /// Live value for `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;
    /// Store `value` for `ttl`.
    fn set(&self, key: &str, value: Value, ttl: Duration);
    /// All live keys.
    fn keys(&self) -> Vec<String>;
    /// Remove `keys`; missing keys are ignored.
    fn remove(&self, keys: &[String]);
}

/// Default in-memory cache. Expired entries are dropped lazily on access.
///
/// A TTL too large to represent as a deadline never expires.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (Value, Option<Instant>)>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StateCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            let (value, expires_at) = entry.value();
            is_live(*expires_at, now).then(|| value.clone())
        };
        if value.is_none() {
            let _ = self.entries.remove_if(key, |_, (_, expires_at)| !is_live(*expires_at, now));
        }
        value
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        let _ = self.entries.insert(key.to_owned(), (value, expires_at));
    }

    fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| is_live(*expires_at, now));
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn remove(&self, keys: &[String]) {
        for key in keys {
            let _ = self.entries.remove(key);
        }
    }
}

/// Session-scoped view over a [`StateCache`].
pub struct State {
    cache: RwLock<Arc<dyn StateCache>>,
    expire: RwLock<Duration>,
}

impl Default for State {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_EXPIRE)
    }
}

impl State {
    /// In-memory store whose entries live for `expire`.
    pub fn new(expire: Duration) -> Self {
        Self {
            cache: RwLock::new(Arc::new(MemoryCache::new())),
            expire: RwLock::new(expire),
        }
    }

    fn cache(&self) -> Arc<dyn StateCache> {
        Arc::clone(&self.cache.read())
    }

    /// Value of `key` for `sid`.
    pub fn get(&self, sid: &str, key: &str) -> Option<Value> {
        self.cache().get(&state_key(sid, key))
    }

    /// Store `value` under `key` for `sid`, refreshing the TTL.
    pub fn set(&self, sid: &str, key: &str, value: Value) {
        let ttl = *self.expire.read();
        self.cache().set(&state_key(sid, key), value, ttl);
    }

    /// Change the TTL applied to subsequent writes.
    pub fn set_expire(&self, expire: Duration) {
        *self.expire.write() = expire;
    }

    /// Current TTL.
    pub fn expire(&self) -> Duration {
        *self.expire.read()
    }

    /// Swap the backing cache. Existing entries are not migrated.
    pub fn set_cache(&self, cache: Arc<dyn StateCache>) {
        *self.cache.write() = cache;
    }

    /// Remove every entry belonging to `sid`.
    pub fn destroy_sid(&self, sid: &str) {
        let prefix = format!("{sid}:");
        let cache = self.cache();
        let keys: Vec<String> = cache
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();
        if !keys.is_empty() {
            debug!(sid, count = keys.len(), "destroying session state");
            cache.remove(&keys);
        }
    }
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_none_or(|at| at > now)
}

fn state_key(sid: &str, key: &str) -> String {
    format!("{sid}:{key}")
}
