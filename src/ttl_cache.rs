//! A bounded-lifetime keyed store used for alert-streak counters and the
//! post-resize debounce flag. Ported from the Python `Cache` helper class.
//!
//! Single-threaded, lazy expiry on access, no background sweeping — entry
//! count is bounded by PVC count and TTL is an order of magnitude larger
//! than the tick interval, so this is intentionally trivial.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct TtlCache<V> {
    default_ttl: Duration,
    entries: HashMap<String, (V, Instant)>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&mut self, key: &str, value: V, ttl: Duration) {
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some((value, expires_at)) => {
                if Instant::now() < *expires_at {
                    Some(value.clone())
                } else {
                    self.entries.remove(key);
                    None
                }
            }
            None => None,
        }
    }

    pub fn unset(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn set_then_get_returns_value() {
        let mut cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(60));
        cache.set("k", 5);
        assert_eq!(cache.get("k"), Some(5));
    }

    #[test]
    fn missing_key_is_absent() {
        let mut cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn expired_entry_is_absent_and_removed() {
        let mut cache: TtlCache<bool> = TtlCache::new(Duration::from_millis(10));
        cache.set("k", true);
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), None);
        // lazily removed: unset is a no-op now but entries map should be empty
        assert_eq!(cache.entries.len(), 0);
    }

    #[test]
    fn unset_removes_entry() {
        let mut cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(60));
        cache.set("k", 1);
        cache.unset("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn reset_clears_all_entries() {
        let mut cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.reset();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn custom_ttl_overrides_default() {
        let mut cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(60));
        cache.set_with_ttl("k", 1, Duration::from_millis(10));
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), None);
    }
}
