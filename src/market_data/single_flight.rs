// =============================================================================
// Single-Flight — coalesce concurrent identical calls
// =============================================================================
//
// Concurrent callers requesting the same key (e.g. the same symbol's
// candles) share one in-flight future instead of hammering the provider N
// times. Implemented with a map of `tokio::sync::broadcast` senders keyed by
// the request key, following the same "a RwLock<HashMap<Key, ...>> is the
// whole data structure" style the teacher uses throughout its market-data
// layer.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<Result<V, String>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` for `key`, coalescing concurrent calls for the same key. The
    /// first caller executes `f`; subsequent concurrent callers await its
    /// result via a broadcast channel instead of re-invoking `f`.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> Result<V, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, String>>,
    {
        let mut rx = {
            let mut inflight = self.inflight.lock();
            if let Some(tx) = inflight.get(&key) {
                Some(tx.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                inflight.insert(key.clone(), tx);
                None
            }
        };

        if let Some(rx) = rx.as_mut() {
            return match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err("single-flight leader dropped without a result".to_string()),
            };
        }

        let result = f().await;

        let tx = {
            let mut inflight = self.inflight.lock();
            inflight.remove(&key)
        };
        if let Some(tx) = tx {
            let _ = tx.send(result.clone());
        }

        result
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSingleFlight<K, V> = Arc<SingleFlight<K, V>>;
