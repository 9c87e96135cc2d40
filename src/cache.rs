//! In-memory TTL cache with lazy expiry.
//!
//! [`TtlCache`] stores values with the instant they were inserted and
//! treats them as absent once `ttl` has elapsed. Expired entries are
//! swept opportunistically on insert; there is no background task. The
//! [`Clock`] is injectable so tests can advance time deterministically.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::reloadable::lock;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// A zero `ttl` disables caching entirely.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Build from a millisecond TTL where zero or negative means "never cache".
    #[must_use]
    pub fn from_millis(ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        let ttl = u64::try_from(ttl_ms).map_or(Duration::ZERO, Duration::from_millis);
        Self::with_clock(ttl, clock)
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let now = self.clock.now();
        let entries = lock(&self.entries);
        entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.value.clone())
    }

    /// Store `value` and hand it back. With caching disabled nothing is stored.
    pub fn put(&self, key: K, value: V) -> V {
        if !self.is_enabled() {
            return value;
        }
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        entries.retain(|_, entry| self.is_fresh(entry, now));
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                inserted_at: now,
            },
        );
        value
    }

    /// Return the cached value or compute, store and return a fresh one.
    ///
    /// The lock is not held while `f` runs; concurrent misses may both compute.
    pub fn get_or_try_insert_with<E, F>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = f()?;
        Ok(self.put(key, value))
    }

    pub fn invalidate(&self, key: &K) {
        lock(&self.entries).remove(key);
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of stored entries, expired ones included until the next sweep.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, entry: &Entry<V>, now: Instant) -> bool {
        now < entry.inserted_at + self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_ms: i64) -> (TtlCache<String, u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TtlCache::from_millis(ttl_ms, clock.clone()), clock)
    }

    #[test]
    fn value_is_returned_until_ttl_elapses() {
        let (cache, clock) = cache(1000);
        assert_eq!(cache.put("k".into(), 1), 1);
        assert_eq!(cache.get(&"k".to_string()), Some(1));

        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get(&"k".to_string()), Some(1));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn zero_or_negative_ttl_never_caches() {
        for ttl in [0, -5] {
            let (cache, _clock) = cache(ttl);
            assert_eq!(cache.put("k".into(), 9), 9);
            assert_eq!(cache.get(&"k".to_string()), None);
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn put_sweeps_expired_entries() {
        let (cache, clock) = cache(100);
        cache.put("a".into(), 1);
        cache.put("b".into(), 2);
        clock.advance(Duration::from_millis(150));
        cache.put("c".into(), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"c".to_string()), Some(3));
    }

    #[test]
    fn get_or_try_insert_with_computes_once_while_fresh() {
        let (cache, clock) = cache(1000);
        let mut calls = 0;
        let mut load = |cache: &TtlCache<String, u32>| {
            cache.get_or_try_insert_with("k".to_string(), || {
                calls += 1;
                Ok::<_, std::convert::Infallible>(calls)
            })
        };
        assert_eq!(load(&cache).unwrap(), 1);
        assert_eq!(load(&cache).unwrap(), 1);
        clock.advance(Duration::from_secs(2));
        assert_eq!(load(&cache).unwrap(), 2);
    }

    #[test]
    fn invalidate_removes_entry() {
        let (cache, _clock) = cache(1000);
        cache.put("k".into(), 1);
        cache.invalidate(&"k".to_string());
        assert_eq!(cache.get(&"k".to_string()), None);
    }
}
