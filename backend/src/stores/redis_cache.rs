//! Redis-backed cache facade.
//!
//! Implements [`CacheStore`] over a single Redis connection manager:
//! strings with TTL, cursor pattern-scan deletion, sorted-set priority
//! queues, failed-job lists, fixed-window rate limiting, distributed
//! locks with compare-and-delete release, and versioned namespace
//! invalidation.
//!
//! # Degraded mode
//!
//! The facade never surfaces store failures. Any operation error marks
//! the connection lost and kicks off exponential-backoff reconnection;
//! until a reconnect succeeds, `get` misses, writes report `false` and
//! rate limiting allows. After the configured attempt ceiling the facade
//! stays disconnected until [`RedisCacheStore::reinitialize`] is called.

use crate::providers::cache::{
    CacheHealth, CacheLock, CacheStats, CacheStore, RateLimitDecision,
};
use chrono::Utc;
use civicwatch_core::config::CacheConfig;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lua compare-and-delete used for atomic lock release.
const RELEASE_LOCK_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
  return redis.call('del', KEYS[1])
else
  return 0
end
";

/// Scan batch size for pattern deletion.
const SCAN_COUNT: usize = 100;

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    url: String,
    config: CacheConfig,
    conn: RwLock<Option<ConnectionManager>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    stats: StatCounters,
}

/// Redis-backed cache facade. Cheap to clone; all clones share the
/// connection and counters (process-wide singleton with explicit
/// init/shutdown, no import-time side effects).
#[derive(Clone)]
pub struct RedisCacheStore {
    inner: Arc<Inner>,
}

impl RedisCacheStore {
    /// Connect the facade. A failed initial connection yields a degraded
    /// facade that will serve misses until [`Self::reinitialize`].
    pub async fn new(url: impl Into<String>, config: CacheConfig) -> Self {
        let store = Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                conn: RwLock::new(None),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                stats: StatCounters::default(),
            }),
        };
        store.reinitialize().await;
        store
    }

    /// Attempt a fresh connection, resetting degraded state.
    pub async fn reinitialize(&self) {
        match Self::open(&self.inner.url).await {
            Ok(manager) => {
                *self.inner.conn.write().await = Some(manager);
                self.inner.connected.store(true, Ordering::SeqCst);
                tracing::info!(url = %self.inner.url, "Cache facade connected");
            }
            Err(error) => {
                self.inner.connected.store(false, Ordering::SeqCst);
                tracing::warn!(error = %error, "Cache facade starting degraded");
            }
        }
    }

    async fn open(url: &str) -> redis::RedisResult<ConnectionManager> {
        let client = Client::open(url)?;
        ConnectionManager::new(client).await
    }

    /// Whether the facade currently believes it is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn conn(&self) -> Option<ConnectionManager> {
        if !self.is_connected() {
            return None;
        }
        self.inner.conn.read().await.clone()
    }

    /// Record an operation failure and kick off background reconnection
    /// with exponential backoff up to the configured ceiling.
    fn note_error(&self, op: &str, error: &redis::RedisError) {
        self.inner.stats.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op = %op, error = %error, "Cache operation failed, degrading");
        self.inner.connected.store(false, Ordering::SeqCst);

        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // a reconnect loop is already running
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut delay = inner.config.reconnect_base_delay;
            for attempt in 1..=inner.config.max_reconnect_attempts {
                tokio::time::sleep(delay).await;
                match Self::open(&inner.url).await {
                    Ok(manager) => {
                        *inner.conn.write().await = Some(manager);
                        inner.connected.store(true, Ordering::SeqCst);
                        inner.reconnecting.store(false, Ordering::SeqCst);
                        tracing::info!(attempt, "Cache facade reconnected");
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(attempt, error = %error, "Cache reconnect attempt failed");
                        delay = (delay * 2).min(inner.config.reconnect_ceiling);
                    }
                }
            }
            // Ceiling reached: stay degraded until explicit reinitialization.
            inner.reconnecting.store(false, Ordering::SeqCst);
            tracing::error!(
                attempts = inner.config.max_reconnect_attempts,
                "Cache reconnect ceiling reached; facade stays disconnected"
            );
        });
    }

    fn version_key(namespace: &str) -> String {
        format!("civicwatch:version:{namespace}")
    }
}

impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(value)) => {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(error) => {
                self.note_error("get", &error);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            Ok(()) => {
                self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(error) => {
                self.note_error("set", &error);
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.del::<_, u64>(key).await {
            Ok(deleted) => {
                self.inner
                    .stats
                    .deletes
                    .fetch_add(deleted, Ordering::Relaxed);
                deleted > 0
            }
            Err(error) => {
                self.note_error("delete", &error);
                false
            }
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };

        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let reply: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await;

            let (next, keys) = match reply {
                Ok(reply) => reply,
                Err(error) => {
                    self.note_error("delete_pattern", &error);
                    return deleted;
                }
            };

            if !keys.is_empty() {
                match conn.del::<_, u64>(keys).await {
                    Ok(count) => deleted += count,
                    Err(error) => {
                        self.note_error("delete_pattern", &error);
                        return deleted;
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        self.inner
            .stats
            .deletes
            .fetch_add(deleted, Ordering::Relaxed);
        deleted
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.zadd::<_, _, _, ()>(key, member, score).await {
            Ok(()) => true,
            Err(error) => {
                self.note_error("zadd", &error);
                false
            }
        }
    }

    async fn zpopmin(&self, key: &str, count: usize) -> Vec<(String, f64)> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        match conn
            .zpopmin::<_, Vec<(String, f64)>>(key, count as isize)
            .await
        {
            Ok(members) => members,
            Err(error) => {
                self.note_error("zpopmin", &error);
                Vec::new()
            }
        }
    }

    async fn zcard(&self, key: &str) -> u64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.zcard::<_, u64>(key).await {
            Ok(count) => count,
            Err(error) => {
                self.note_error("zcard", &error);
                0
            }
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.lpush::<_, _, ()>(key, value).await {
            Ok(()) => true,
            Err(error) => {
                self.note_error("lpush", &error);
                false
            }
        }
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        match conn.lrange::<_, Vec<String>>(key, start, stop).await {
            Ok(values) => values,
            Err(error) => {
                self.note_error("lrange", &error);
                Vec::new()
            }
        }
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.ltrim::<_, ()>(key, start, stop).await {
            Ok(()) => true,
            Err(error) => {
                self.note_error("ltrim", &error);
                false
            }
        }
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> u64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.lrem::<_, _, u64>(key, count, value).await {
            Ok(removed) => removed,
            Err(error) => {
                self.note_error("lrem", &error);
                0
            }
        }
    }

    async fn check_rate_limit(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> RateLimitDecision {
        let now = Utc::now();
        let Some(mut conn) = self.conn().await else {
            return RateLimitDecision::allow_degraded(limit, now);
        };

        let count: u64 = match conn.incr(key, 1).await {
            Ok(count) => count,
            Err(error) => {
                self.note_error("rate_limit", &error);
                return RateLimitDecision::allow_degraded(limit, now);
            }
        };

        // First touch opens the window.
        if count == 1 {
            if let Err(error) = conn.expire::<_, ()>(key, window_secs as i64).await {
                self.note_error("rate_limit", &error);
            }
        }

        let ttl: i64 = conn.ttl(key).await.unwrap_or(window_secs as i64);
        let reset_at = now + chrono::Duration::seconds(ttl.max(0));
        let allowed = count <= u64::from(limit);
        let remaining = u64::from(limit).saturating_sub(count);

        if !allowed {
            tracing::warn!(
                rate_limit_exceeded = true,
                key = %key,
                count,
                limit,
                "Rate limit exceeded"
            );
        }

        RateLimitDecision {
            allowed,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_at,
        }
    }

    async fn acquire_lock(
        &self,
        resource: &str,
        ttl_secs: u64,
        retries: u32,
    ) -> Option<CacheLock> {
        let mut conn = self.conn().await?;

        let key = format!("civicwatch:lock:{resource}");
        let token = format!(
            "{}_{}_{}",
            std::process::id(),
            Utc::now().timestamp_millis(),
            rand::thread_rng().r#gen::<u64>()
        );

        for attempt in 0..retries.max(1) {
            let reply: Result<Option<String>, _> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await;

            match reply {
                Ok(Some(_)) => {
                    return Some(CacheLock { key, value: token });
                }
                Ok(None) => {
                    // Contended; linear backoff before the next attempt.
                    tokio::time::sleep(std::time::Duration::from_millis(
                        100 * u64::from(attempt + 1),
                    ))
                    .await;
                }
                Err(error) => {
                    self.note_error("acquire_lock", &error);
                    return None;
                }
            }
        }
        None
    }

    async fn release_lock(&self, lock: &CacheLock) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let script = redis::Script::new(RELEASE_LOCK_SCRIPT);
        let result: Result<i64, _> = script
            .key(&lock.key)
            .arg(&lock.value)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(result) => result == 1,
            Err(error) => {
                self.note_error("release_lock", &error);
                false
            }
        }
    }

    async fn bump_version(&self, namespace: &str) -> u64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.incr::<_, _, u64>(Self::version_key(namespace), 1).await {
            Ok(version) => version,
            Err(error) => {
                self.note_error("bump_version", &error);
                0
            }
        }
    }

    async fn current_version(&self, namespace: &str) -> u64 {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn
            .get::<_, Option<u64>>(Self::version_key(namespace))
            .await
        {
            Ok(version) => version.unwrap_or(0),
            Err(error) => {
                self.note_error("current_version", &error);
                0
            }
        }
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    async fn health_check(&self) -> CacheHealth {
        let stats = self.inner.stats.snapshot();
        let Some(mut conn) = self.conn().await else {
            return CacheHealth {
                connected: false,
                latency_ms: None,
                stats,
            };
        };

        let start = std::time::Instant::now();
        let ping: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match ping {
            Ok(_) => CacheHealth {
                connected: true,
                latency_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
                stats,
            },
            Err(error) => {
                self.note_error("health_check", &error);
                CacheHealth {
                    connected: false,
                    latency_ms: None,
                    stats,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    async fn store() -> RedisCacheStore {
        RedisCacheStore::new("redis://127.0.0.1:6379", CacheConfig::default()).await
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn get_set_roundtrip() {
        let cache = store().await;
        let key = format!("civicwatch:test:{}", uuid::Uuid::new_v4());
        assert!(cache.get(&key).await.is_none());
        assert!(cache.set(&key, "value", 60).await);
        assert_eq!(cache.get(&key).await.as_deref(), Some("value"));
        assert!(cache.delete(&key).await);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn lock_release_is_compare_and_delete() {
        let cache = store().await;
        let resource = format!("test:{}", uuid::Uuid::new_v4());
        let lock = cache.acquire_lock(&resource, 30, 1).await;
        assert!(lock.is_some());
        let lock = match lock {
            Some(lock) => lock,
            None => return,
        };

        let stale = CacheLock {
            key: lock.key.clone(),
            value: "not-the-holder".to_string(),
        };
        assert!(!cache.release_lock(&stale).await);
        assert!(cache.release_lock(&lock).await);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn version_bump_changes_versioned_keys() {
        let cache = store().await;
        let namespace = format!("test-{}", uuid::Uuid::new_v4());
        let before = cache.versioned_key(&namespace, "list").await;
        cache.bump_version(&namespace).await;
        let after = cache.versioned_key(&namespace, "list").await;
        assert_ne!(before, after);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn rate_limit_blocks_over_budget() {
        let cache = store().await;
        let key = format!("civicwatch:test:rl:{}", uuid::Uuid::new_v4());
        for _ in 0..3 {
            assert!(cache.check_rate_limit(&key, 3, 60).await.allowed);
        }
        assert!(!cache.check_rate_limit(&key, 3, 60).await.allowed);
        cache.delete(&key).await;
    }
}
