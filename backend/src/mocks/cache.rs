//! In-memory cache facade for testing.
//!
//! Implements the full [`CacheStore`] surface over process memory,
//! including versioned namespaces, sorted sets, lists, locks and a
//! degraded-mode toggle for exercising fail-open behavior.

use crate::providers::cache::{
    CacheHealth, CacheLock, CacheStats, CacheStore, RateLimitDecision,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    strings: HashMap<String, Entry>,
    sorted_sets: HashMap<String, Vec<(String, f64)>>,
    lists: HashMap<String, VecDeque<String>>,
    rate_limits: HashMap<String, (u64, DateTime<Utc>)>,
    versions: HashMap<String, u64>,
    locks: HashMap<String, (String, DateTime<Utc>)>,
}

/// In-memory cache facade.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    state: Arc<Mutex<State>>,
    degraded: Arc<AtomicBool>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl MemoryCacheStore {
    /// Create an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle degraded mode: every operation behaves as if the store
    /// were unreachable.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        // Propagating a poisoned lock would turn a failed test into a
        // hang; take the inner state either way.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn live_value(entry: &Entry, now: DateTime<Utc>) -> Option<String> {
        match entry.expires_at {
            Some(expires) if expires <= now => None,
            _ => Some(entry.value.clone()),
        }
    }
}

/// Minimal glob matcher: `*` matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if index == parts.len() - 1 {
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        if self.is_degraded() {
            return None;
        }
        let now = Utc::now();
        let state = self.lock_state();
        let value = state.strings.get(key).and_then(|e| Self::live_value(e, now));
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        if self.is_degraded() {
            return false;
        }
        let expires_at = (ttl_secs > 0)
            .then(|| Utc::now() + Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)));
        self.lock_state().strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        true
    }

    async fn delete(&self, key: &str) -> bool {
        if self.is_degraded() {
            return false;
        }
        self.lock_state().strings.remove(key).is_some()
    }

    async fn delete_pattern(&self, pattern: &str) -> u64 {
        if self.is_degraded() {
            return 0;
        }
        let mut state = self.lock_state();
        let keys: Vec<String> = state
            .strings
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        let deleted = keys.len() as u64;
        for key in keys {
            state.strings.remove(&key);
        }
        deleted
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> bool {
        if self.is_degraded() {
            return false;
        }
        let mut state = self.lock_state();
        let set = state.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        set.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        true
    }

    async fn zpopmin(&self, key: &str, count: usize) -> Vec<(String, f64)> {
        if self.is_degraded() {
            return Vec::new();
        }
        let mut state = self.lock_state();
        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Vec::new();
        };
        let take = count.min(set.len());
        set.drain(..take).collect()
    }

    async fn zcard(&self, key: &str) -> u64 {
        if self.is_degraded() {
            return 0;
        }
        self.lock_state()
            .sorted_sets
            .get(key)
            .map_or(0, |set| set.len() as u64)
    }

    async fn lpush(&self, key: &str, value: &str) -> bool {
        if self.is_degraded() {
            return false;
        }
        self.lock_state()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        true
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        if self.is_degraded() {
            return Vec::new();
        }
        let state = self.lock_state();
        let Some(list) = state.lists.get(key) else {
            return Vec::new();
        };
        if list.is_empty() {
            return Vec::new();
        }
        let len = list.len() as isize;
        let resolve = |index: isize| -> usize {
            let resolved = if index < 0 { len + index } else { index };
            resolved.clamp(0, len) as usize
        };
        let (from, to) = (resolve(start), resolve(stop).min(list.len() - 1));
        if from > to {
            return Vec::new();
        }
        list.iter().skip(from).take(to - from + 1).cloned().collect()
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> bool {
        if self.is_degraded() {
            return false;
        }
        let kept = self.lrange(key, start, stop).await;
        self.lock_state()
            .lists
            .insert(key.to_string(), kept.into_iter().collect());
        true
    }

    async fn lrem(&self, key: &str, _count: isize, value: &str) -> u64 {
        if self.is_degraded() {
            return 0;
        }
        let mut state = self.lock_state();
        let Some(list) = state.lists.get_mut(key) else {
            return 0;
        };
        let before = list.len();
        list.retain(|v| v != value);
        (before - list.len()) as u64
    }

    async fn check_rate_limit(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> RateLimitDecision {
        let now = Utc::now();
        if self.is_degraded() {
            return RateLimitDecision::allow_degraded(limit, now);
        }
        let mut state = self.lock_state();
        let window = Duration::seconds(i64::try_from(window_secs).unwrap_or(i64::MAX));
        let slot = state
            .rate_limits
            .entry(key.to_string())
            .or_insert((0, now + window));
        if slot.1 <= now {
            *slot = (0, now + window);
        }
        slot.0 += 1;
        let allowed = slot.0 <= u64::from(limit);
        RateLimitDecision {
            allowed,
            remaining: u32::try_from(u64::from(limit).saturating_sub(slot.0)).unwrap_or(0),
            reset_at: slot.1,
        }
    }

    async fn acquire_lock(
        &self,
        resource: &str,
        ttl_secs: u64,
        _retries: u32,
    ) -> Option<CacheLock> {
        if self.is_degraded() {
            return None;
        }
        let now = Utc::now();
        let key = format!("civicwatch:lock:{resource}");
        let token = uuid::Uuid::new_v4().to_string();
        let mut state = self.lock_state();
        match state.locks.get(&key) {
            Some((_, expires)) if *expires > now => None,
            _ => {
                state.locks.insert(
                    key.clone(),
                    (
                        token.clone(),
                        now + Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
                    ),
                );
                Some(CacheLock { key, value: token })
            }
        }
    }

    async fn release_lock(&self, lock: &CacheLock) -> bool {
        if self.is_degraded() {
            return false;
        }
        let mut state = self.lock_state();
        match state.locks.get(&lock.key) {
            Some((token, _)) if *token == lock.value => {
                state.locks.remove(&lock.key);
                true
            }
            _ => false,
        }
    }

    async fn bump_version(&self, namespace: &str) -> u64 {
        if self.is_degraded() {
            return 0;
        }
        let mut state = self.lock_state();
        let version = state.versions.entry(namespace.to_string()).or_insert(0);
        *version += 1;
        *version
    }

    async fn current_version(&self, namespace: &str) -> u64 {
        if self.is_degraded() {
            return 0;
        }
        self.lock_state()
            .versions
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: 0,
            deletes: 0,
            errors: 0,
        }
    }

    async fn health_check(&self) -> CacheHealth {
        CacheHealth {
            connected: !self.is_degraded(),
            latency_ms: Some(0),
            stats: self.stats(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_delete_roundtrip() {
        let cache = MemoryCacheStore::new();
        assert!(cache.get("k").await.is_none());
        assert!(cache.set("k", "v", 60).await);
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert!(cache.delete("k").await);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn degraded_mode_fails_open() {
        let cache = MemoryCacheStore::new();
        cache.set("k", "v", 60).await;
        cache.set_degraded(true);
        assert!(cache.get("k").await.is_none());
        assert!(!cache.set("k2", "v", 60).await);
        assert!(!cache.delete("k").await);
        let decision = cache.check_rate_limit("rl", 1, 60).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn pattern_delete_uses_glob() {
        let cache = MemoryCacheStore::new();
        cache.set("civicwatch:reports:1", "a", 60).await;
        cache.set("civicwatch:reports:2", "b", 60).await;
        cache.set("civicwatch:admin:1", "c", 60).await;
        assert_eq!(cache.delete_pattern("civicwatch:reports:*").await, 2);
        assert!(cache.get("civicwatch:admin:1").await.is_some());
    }

    #[tokio::test]
    async fn sorted_set_pops_lowest_score_first() {
        let cache = MemoryCacheStore::new();
        cache.zadd("q", 3.0, "c").await;
        cache.zadd("q", 1.0, "a").await;
        cache.zadd("q", 2.0, "b").await;
        assert_eq!(cache.zcard("q").await, 3);
        let popped = cache.zpopmin("q", 2).await;
        assert_eq!(popped[0].0, "a");
        assert_eq!(popped[1].0, "b");
        assert_eq!(cache.zcard("q").await, 1);
    }

    #[tokio::test]
    async fn rate_limit_window() {
        let cache = MemoryCacheStore::new();
        for _ in 0..5 {
            assert!(cache.check_rate_limit("rl", 5, 60).await.allowed);
        }
        assert!(!cache.check_rate_limit("rl", 5, 60).await.allowed);
    }

    #[tokio::test]
    async fn lock_is_exclusive_and_token_checked() {
        let cache = MemoryCacheStore::new();
        let lock = cache.acquire_lock("sweep", 30, 1).await.unwrap();
        assert!(cache.acquire_lock("sweep", 30, 1).await.is_none());

        let stale = CacheLock {
            key: lock.key.clone(),
            value: "someone-else".to_string(),
        };
        assert!(!cache.release_lock(&stale).await);
        assert!(cache.release_lock(&lock).await);
        assert!(cache.acquire_lock("sweep", 30, 1).await.is_some());
    }

    #[tokio::test]
    async fn version_bump_invalidates_versioned_keys() {
        let cache = MemoryCacheStore::new();
        let key_v0 = cache.versioned_key("reports", "list").await;
        cache.set(&key_v0, "cached", 60).await;
        assert!(cache.get(&key_v0).await.is_some());

        cache.bump_version("reports").await;
        let key_v1 = cache.versioned_key("reports", "list").await;
        assert_ne!(key_v0, key_v1);
        assert!(cache.get(&key_v1).await.is_none());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("a:*", "a:b"));
        assert!(glob_match("*:b", "a:b"));
        assert!(glob_match("a:*:c", "a:b:c"));
        assert!(!glob_match("a:*:c", "a:b:d"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exacted"));
    }
}
