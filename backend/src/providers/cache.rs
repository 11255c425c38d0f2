//! Key-value cache facade trait.
//!
//! A single thin abstraction in front of a remote key-value store that
//! speaks strings, sorted sets, lists, atomic counters and
//! compare-and-delete locks.
//!
//! # Degraded mode
//!
//! Cache operations MUST NOT fail a request. The trait is therefore
//! infallible: when the store is unreachable, `get` returns `None`,
//! `set`/`delete` return `false`, and `check_rate_limit` allows. Errors
//! are logged inside implementations, never surfaced.
//!
//! # Versioned namespaces
//!
//! Each namespace holds an integer version under a well-known key.
//! Invalidation is an atomic increment; cache keys embed the current
//! version, so readers transparently miss after a bump without any key
//! being deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Request may proceed.
    pub allowed: bool,
    /// Requests left in the window.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Fail-open decision used when the store is unreachable.
    #[must_use]
    pub fn allow_degraded(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_at: now,
        }
    }
}

/// A held distributed lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLock {
    /// Full lock key.
    pub key: String,
    /// Holder token; release is compare-and-delete on this value.
    pub value: String,
}

/// Facade operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful gets.
    pub hits: u64,
    /// Missed gets.
    pub misses: u64,
    /// Successful sets.
    pub sets: u64,
    /// Deleted keys.
    pub deletes: u64,
    /// Operations that failed against the store.
    pub errors: u64,
}

/// Health probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHealth {
    /// Connected to the store.
    pub connected: bool,
    /// Round-trip latency of a ping, when connected.
    pub latency_ms: Option<u64>,
    /// Operation counters.
    pub stats: CacheStats,
}

/// Key-value cache facade.
///
/// See the module docs for degraded-mode semantics; no method on this
/// trait may surface a store failure.
pub trait CacheStore: Send + Sync {
    /// Get a value. `None` on miss or when degraded.
    fn get(&self, key: &str) -> impl Future<Output = Option<String>> + Send;

    /// Set a value with a TTL in seconds. `false` when degraded.
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> impl Future<Output = bool> + Send;

    /// Delete a key. `false` when absent or degraded.
    fn delete(&self, key: &str) -> impl Future<Output = bool> + Send;

    /// Delete every key matching a glob pattern using non-blocking
    /// cursor iteration (batches of 100). Returns keys deleted.
    fn delete_pattern(&self, pattern: &str) -> impl Future<Output = u64> + Send;

    /// Add a member to a sorted set.
    fn zadd(&self, key: &str, score: f64, member: &str) -> impl Future<Output = bool> + Send;

    /// Pop up to `count` lowest-score members.
    fn zpopmin(&self, key: &str, count: usize)
        -> impl Future<Output = Vec<(String, f64)>> + Send;

    /// Sorted-set cardinality.
    fn zcard(&self, key: &str) -> impl Future<Output = u64> + Send;

    /// Prepend a value to a list.
    fn lpush(&self, key: &str, value: &str) -> impl Future<Output = bool> + Send;

    /// Read a list range (inclusive indices, -1 for the end).
    fn lrange(&self, key: &str, start: isize, stop: isize)
        -> impl Future<Output = Vec<String>> + Send;

    /// Trim a list to a range.
    fn ltrim(&self, key: &str, start: isize, stop: isize) -> impl Future<Output = bool> + Send;

    /// Remove occurrences of a value from a list.
    fn lrem(&self, key: &str, count: isize, value: &str) -> impl Future<Output = u64> + Send;

    /// Atomic fixed-window rate-limit check: increment, setting the TTL
    /// on first touch. Allows when degraded.
    fn check_rate_limit(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> impl Future<Output = RateLimitDecision> + Send;

    /// Acquire a distributed lock with bounded retries. `None` when the
    /// lock is contended or the store is degraded.
    fn acquire_lock(
        &self,
        resource: &str,
        ttl_secs: u64,
        retries: u32,
    ) -> impl Future<Output = Option<CacheLock>> + Send;

    /// Atomically release a lock (compare-and-delete on the holder
    /// token). `false` when the lock was lost or the store is degraded.
    fn release_lock(&self, lock: &CacheLock) -> impl Future<Output = bool> + Send;

    /// Atomically bump a namespace version, logically invalidating every
    /// key embedding the previous version.
    fn bump_version(&self, namespace: &str) -> impl Future<Output = u64> + Send;

    /// Current namespace version; a missing version reads as 1.
    fn current_version(&self, namespace: &str) -> impl Future<Output = u64> + Send;

    /// Build a key embedding the namespace's current version.
    fn versioned_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl Future<Output = String> + Send
    where
        Self: Sized,
    {
        async move {
            let version = self.current_version(namespace).await;
            format!("{namespace}:v{version}:{key}")
        }
    }

    /// Operation counters.
    fn stats(&self) -> CacheStats;

    /// Health probe.
    fn health_check(&self) -> impl Future<Output = CacheHealth> + Send;
}

/// Build a namespaced cache key: `civicwatch:<domain>:<segments…>`.
#[must_use]
pub fn cache_key(domain: &str, segments: &[&str]) -> String {
    let mut key = format!("civicwatch:{domain}");
    for segment in segments {
        key.push(':');
        key.push_str(segment);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builder_joins_segments() {
        assert_eq!(
            cache_key("device", &["fingerprint", "fp-A"]),
            "civicwatch:device:fingerprint:fp-A"
        );
        assert_eq!(cache_key("version", &[]), "civicwatch:version");
    }
}
