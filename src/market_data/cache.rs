// =============================================================================
// Per-Method TTL Cache
// =============================================================================
//
// A plain `HashMap<K, (V, Instant)>` behind a `parking_lot::RwLock`, matching
// the teacher's preference for simple lock-guarded collections over an
// external caching crate. One instance per method (candles / prices /
// indicators / chain / GEX) since each has its own TTL.
// =============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

/// A cache read result. `Fresh` is within TTL; `Stale` is returned when the
/// caller explicitly asks for a best-effort value during a cascaded provider
/// failure (§4.11: "stale data may be returned ... with a `stale=true`
/// marker").
pub enum CacheRead<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> CacheRead<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                CacheRead::Fresh(entry.value.clone())
            }
            Some(entry) => CacheRead::Stale(entry.value.clone()),
            None => CacheRead::Miss,
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.entries.write().insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_fresh_then_stale() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_millis(10));
        assert!(matches!(cache.get(&"a".to_string()), CacheRead::Miss));
        cache.put("a".to_string(), 1);
        assert!(matches!(cache.get(&"a".to_string()), CacheRead::Fresh(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(cache.get(&"a".to_string()), CacheRead::Stale(1)));
    }
}
