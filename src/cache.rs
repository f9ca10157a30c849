//! # Cache Layer
//! In-process TTL cache for computed results, keyed by request fingerprint.
//!
//! Values are stored as serialized JSON blobs with an absolute expiry in unix
//! milliseconds. Expiry is checked lazily on read: an entry whose expiry is
//! `<= now` is never served and is evicted on that access. There is no
//! background sweeper; [`CacheLayer::purge_expired`] exists for the cleanup job.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};

use crate::clock::Clock;

#[derive(Debug, Clone)]
struct CacheEntry {
    blob: String,
    expires_at_ms: i64,
}

/// Thread-safe TTL map. Readers share the lock; writers replace whole entries.
pub struct CacheLayer {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl CacheLayer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Return the value under `key` if present, fresh, and decodable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.now_ms();
        let stale = {
            let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match map.get(key) {
                None => {
                    counter!("pipeline_cache_misses_total").increment(1);
                    return None;
                }
                Some(e) if now < e.expires_at_ms => match serde_json::from_str(&e.blob) {
                    Ok(v) => {
                        counter!("pipeline_cache_hits_total").increment(1);
                        return Some(v);
                    }
                    Err(err) => {
                        tracing::warn!(key, error = %err, "undecodable cache entry");
                        false
                    }
                },
                Some(_) => true,
            }
        };
        if stale {
            let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            // a concurrent set may have refreshed it in between
            if map.get(key).is_some_and(|e| now >= e.expires_at_ms) {
                map.remove(key);
            }
        }
        counter!("pipeline_cache_misses_total").increment(1);
        None
    }

    /// Store `value` under `key` for `ttl`. Serialization failures are logged and dropped.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let blob = match serde_json::to_string(value) {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(key, error = %err, "cannot serialize cache value");
                return;
            }
        };
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            blob,
            expires_at_ms: self.now_ms().saturating_add(ttl_ms),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.now_ms();
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, e| now < e.expires_at_ms);
        before - map.len()
    }

    /// Entries currently held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<ManualClock>, CacheLayer) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let cache = CacheLayer::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn fresh_entry_is_served_until_expiry() {
        let (clock, cache) = setup();
        cache.set("hot_topics:20", &vec![1, 2, 3], Duration::from_secs(300));

        clock.advance(chrono::Duration::seconds(299));
        assert_eq!(cache.get::<Vec<i32>>("hot_topics:20"), Some(vec![1, 2, 3]));

        // exactly at t the entry is gone
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cache.get::<Vec<i32>>("hot_topics:20"), None);
        assert!(cache.is_empty(), "expired entry is evicted on access");
    }

    #[test]
    fn missing_key_is_a_miss() {
        let (_clock, cache) = setup();
        assert_eq!(cache.get::<String>("platform_stats"), None);
    }

    #[test]
    fn set_overwrites_and_restarts_ttl() {
        let (clock, cache) = setup();
        cache.set("k", &"first", Duration::from_secs(10));
        clock.advance(chrono::Duration::seconds(8));
        cache.set("k", &"second", Duration::from_secs(10));
        clock.advance(chrono::Duration::seconds(8));
        assert_eq!(cache.get::<String>("k").as_deref(), Some("second"));
    }

    #[test]
    fn wrong_type_is_treated_as_miss() {
        let (_clock, cache) = setup();
        cache.set("k", &"text", Duration::from_secs(10));
        assert_eq!(cache.get::<Vec<u8>>("k"), None);
    }

    #[test]
    fn purge_drops_only_expired() {
        let (clock, cache) = setup();
        cache.set("short", &1, Duration::from_secs(5));
        cache.set("long", &2, Duration::from_secs(600));
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<i32>("long"), Some(2));
    }

    #[test]
    fn poisoned_lock_keeps_serving() {
        let (_clock, cache) = setup();
        cache.set("k", &1, Duration::from_secs(60));
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _held = cache.entries.write().unwrap();
                    panic!("writer died holding the lock");
                })
                .join();
        });
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.get::<i32>("k"), Some(1));
        cache.set("k", &2, Duration::from_secs(60));
        assert_eq!(cache.get::<i32>("k"), Some(2));
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.len(), 1);
    }
}
