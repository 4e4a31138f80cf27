//! In-memory TTL cache shared by the directory indexer and metadata lookups.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace};

/// Source of monotonic time for expiry checks.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub ttl_secs: u64,
}

/// Thread-safe key/value store where every entry carries its own expiry.
///
/// Expiry is checked on every read, so an expired value is never returned
/// even if [`ExpiringCache::purge_expired`] has not run. Values are cloned
/// out; store `Arc`s for anything large.
pub struct ExpiringCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> fmt::Debug for ExpiringCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("size", &self.entries.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(MonotonicClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        debug!(ttl_secs = ttl.as_secs(), "cache initialized");
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                trace!("cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            trace!("cache entry expired");
        } else {
            trace!("cache miss");
        }
        None
    }

    /// Store `value` with the cache's default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX.into()));

        let mut entries = self.entries.lock();
        entries.insert(key, CacheEntry { value, expires_at });
        trace!(size = entries.len(), "cache set");
    }

    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop everything; returns how many entries were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        info!(removed = count, "cache cleared");
        count
    }

    /// Remove all expired entries eagerly.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn manual_cache(ttl_secs: u64) -> (ManualClock, ExpiringCache<String, u32>) {
        let clock = ManualClock::new();
        let cache = ExpiringCache::with_clock(Duration::from_secs(ttl_secs), Arc::new(clock.clone()));
        (clock, cache)
    }

    #[test]
    fn returns_values_within_ttl() {
        let (clock, cache) = manual_cache(10);
        cache.set("a".to_string(), 1);
        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn expired_entries_are_absent_and_purged_on_read() {
        let (clock, cache) = manual_cache(300);
        cache.set_with_ttl("a".to_string(), 1, Duration::from_secs(1));
        clock.advance(Duration::from_millis(1500));

        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (clock, cache) = manual_cache(5);
        cache.set("a".to_string(), 1);
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn overwrite_resets_expiry() {
        let (clock, cache) = manual_cache(10);
        cache.set("a".to_string(), 1);
        clock.advance(Duration::from_secs(8));
        cache.set("a".to_string(), 2);
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("a"), Some(2));
    }

    #[test]
    fn invalidate_and_clear() {
        let (_clock, cache) = manual_cache(10);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.stats(), CacheStats { size: 0, ttl_secs: 10 });
    }

    #[test]
    fn purge_removes_only_expired() {
        let (clock, cache) = manual_cache(10);
        cache.set_with_ttl("short".to_string(), 1, Duration::from_secs(1));
        cache.set("long".to_string(), 2);
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let cache = Arc::new(ExpiringCache::<u32, u32>::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        cache.set(i % 16, worker);
                        if let Some(value) = cache.get(&(i % 16)) {
                            assert!(value < 8);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
