//! Response cache for source payloads.
//!
//! Entries are keyed by an opaque request key (source, endpoint, identifier)
//! and carry their own TTL. Freshness is judged against the caller's clock,
//! so an entry is live while `now - fetched_at < ttl`.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Cached payload with the time it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: Value,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, fetched_at: DateTime<Utc>, payload: Value, ttl_secs: u64) -> Self {
        Self {
            key: key.into(),
            fetched_at,
            payload,
            ttl_secs,
        }
    }

    /// Whether the entry may still be served at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let ttl = Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX / 1000));
        now - self.fetched_at < ttl
    }
}

/// Storage backend for cached payloads.
pub trait CacheStore: Send + Sync {
    /// Live payload for `key`, if any.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Value>;

    /// Insert or replace an entry.
    fn put(&self, entry: CacheEntry);

    /// Drop a single key.
    fn invalidate(&self, key: &str);

    /// Drop every entry that is no longer live.
    fn clear_expired(&self, now: DateTime<Utc>);

    fn stats(&self, now: DateTime<Utc>) -> CacheStats;
}

/// In-process cache.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Clear all entries
    pub fn clear_all(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let entries = self.entries.read().ok()?;

        entries.get(key).and_then(|entry| {
            if entry.is_live(now) {
                Some(entry.payload.clone())
            } else {
                None
            }
        })
    }

    fn put(&self, entry: CacheEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(entry.key.clone(), entry);
        }
    }

    fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    fn clear_expired(&self, now: DateTime<Utc>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, entry| entry.is_live(now));
        }
    }

    fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let entries = self.entries.read().ok();
        let (total, expired) = entries
            .map(|e| {
                let total = e.len();
                let expired = e.values().filter(|entry| !entry.is_live(now)).count();
                (total, expired)
            })
            .unwrap_or((0, 0));

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_cache_put_get() {
        let cache = MemoryCache::new();
        cache.put(CacheEntry::new("finnhub:quote:NVDA", t0(), json!({"c": 120.5}), 60));

        let hit = cache.get("finnhub:quote:NVDA", t0() + Duration::seconds(30));
        assert_eq!(hit, Some(json!({"c": 120.5})));
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryCache::new();
        assert!(cache.get("finnhub:quote:NVDA", t0()).is_none());
    }

    #[test]
    fn test_entry_expires_at_ttl_boundary() {
        let cache = MemoryCache::new();
        cache.put(CacheEntry::new("k", t0(), json!(1), 60));

        assert!(cache.get("k", t0() + Duration::seconds(59)).is_some());
        // now - fetched_at == ttl is already stale
        assert!(cache.get("k", t0() + Duration::seconds(60)).is_none());
    }

    #[test]
    fn test_put_replaces_entry() {
        let cache = MemoryCache::new();
        cache.put(CacheEntry::new("k", t0(), json!("old"), 60));
        cache.put(CacheEntry::new("k", t0() + Duration::seconds(120), json!("new"), 60));

        assert_eq!(cache.get("k", t0() + Duration::seconds(130)), Some(json!("new")));
    }

    #[test]
    fn test_invalidate() {
        let cache = MemoryCache::new();
        cache.put(CacheEntry::new("a", t0(), json!(1), 60));
        cache.put(CacheEntry::new("b", t0(), json!(2), 60));

        cache.invalidate("a");

        assert!(cache.get("a", t0()).is_none());
        assert!(cache.get("b", t0()).is_some());
    }

    #[test]
    fn test_clear_expired_and_stats() {
        let cache = MemoryCache::new();
        cache.put(CacheEntry::new("short", t0(), json!(1), 10));
        cache.put(CacheEntry::new("long", t0(), json!(2), 3600));

        let later = t0() + Duration::seconds(60);
        assert_eq!(
            cache.stats(later),
            CacheStats {
                total_entries: 2,
                expired_entries: 1,
                active_entries: 1,
            }
        );

        cache.clear_expired(later);
        assert_eq!(cache.stats(later).total_entries, 1);

        cache.clear_all();
        assert_eq!(cache.stats(later).total_entries, 0);
    }
}
