//! Bounded blob cache with request coalescing.
//!
//! Entries are kept in a small least-recently-used table guarded by a mutex.
//! Concurrent fetches for the same key are deduplicated: the first caller
//! performs the fetch while later callers wait for its result.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, trace};

use crate::error::{DanmakuError, Result};

/// Default number of distinct content ids kept per cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

/// Least-recently-used table with a fixed capacity.
///
/// `order` holds keys from least to most recently used.
#[derive(Debug)]
pub struct BoundedLru<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedLru<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Look up a key and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
        }
        self.map.get(key)
    }

    /// Look up a key without changing its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Insert or replace an entry, returning the evicted entries.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        if self.map.insert(key.clone(), value).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }

        let mut evicted = Vec::new();
        while self.map.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(value) = self.map.remove(&oldest) {
                evicted.push((oldest, value));
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.map.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Outcome of a failed fetch as seen by coalesced waiters.
///
/// [`DanmakuError`] is not `Clone`, so the kinds callers branch on are kept
/// and everything else is carried as its message.
#[derive(Debug, Clone, PartialEq)]
enum SharedFailure {
    Cancelled,
    NoData { content_id: i64 },
    Transport(String),
    Decode(String),
    Other(String),
}

impl From<&DanmakuError> for SharedFailure {
    fn from(err: &DanmakuError) -> Self {
        match err {
            DanmakuError::Cancelled => Self::Cancelled,
            DanmakuError::NoData { content_id } => Self::NoData {
                content_id: *content_id,
            },
            DanmakuError::Transport(msg) => Self::Transport(msg.clone()),
            DanmakuError::Decode(msg) => Self::Decode(msg.clone()),
            DanmakuError::Prost(_) | DanmakuError::Xml(_) => Self::Decode(err.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<SharedFailure> for DanmakuError {
    fn from(failure: SharedFailure) -> Self {
        match failure {
            SharedFailure::Cancelled => Self::Cancelled,
            SharedFailure::NoData { content_id } => Self::NoData { content_id },
            SharedFailure::Transport(msg) => Self::Transport(msg),
            SharedFailure::Decode(msg) => Self::Decode(msg),
            SharedFailure::Other(msg) => Self::Other(msg),
        }
    }
}

/// Shared slot for a fetch that is currently running.
///
/// The leader publishes exactly once; waiters that arrive after publication
/// read the stored outcome without waiting on `notify`.
struct InFlightState<V> {
    outcome: OnceCell<std::result::Result<V, SharedFailure>>,
    notify: Notify,
}

impl<V: Clone> InFlightState<V> {
    fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn publish(&self, outcome: std::result::Result<V, SharedFailure>) {
        if self.outcome.set(outcome).is_ok() {
            self.notify.notify_waiters();
        }
    }

    fn succeed(&self, value: V) {
        self.publish(Ok(value));
    }

    fn fail(&self, failure: SharedFailure) {
        self.publish(Err(failure));
    }

    async fn wait(&self) -> Result<V> {
        loop {
            // Register before the second check so a publish in between is not missed.
            let notified = self.notify.notified();
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone().map_err(DanmakuError::from);
            }
            notified.await;
        }
    }
}

/// Removes the in-flight slot and wakes waiters if the leading fetch is
/// dropped before it finished.
struct InFlightGuard<'a, K: Eq + Hash, V: Clone> {
    cache: &'a BlobCache<K, V>,
    key: K,
    state: Arc<InFlightState<V>>,
    completed: bool,
}

impl<K: Eq + Hash, V: Clone> Drop for InFlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.cache.remove_in_flight(&self.key, &self.state);
        self.state.fail(SharedFailure::Cancelled);
    }
}

/// Thread-safe bounded cache keyed by content id.
pub struct BlobCache<K, V> {
    name: &'static str,
    entries: Mutex<BoundedLru<K, V>>,
    in_flight: Mutex<HashMap<K, Arc<InFlightState<V>>>>,
}

impl<K, V> BlobCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            entries: Mutex::new(BoundedLru::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get a cached value, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) {
        let evicted = self.entries.lock().insert(key, value);
        for (key, _) in evicted {
            debug!(cache = self.name, key = ?key, "Evicted cached blob");
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Drop every cached entry and fail any waiters on in-flight fetches.
    pub fn clear(&self) {
        self.entries.lock().clear();
        let drained: Vec<_> = self.in_flight.lock().drain().collect();
        for (_, state) in drained {
            debug!(cache = self.name, "Cancelled in-flight fetch on clear");
            state.fail(SharedFailure::Cancelled);
        }
    }

    /// Number of fetches currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn has_in_flight(&self, key: &K) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Return the cached value or run `fetch` to produce it.
    ///
    /// At most one `fetch` runs per key at a time; concurrent callers share
    /// its outcome. Failed fetches are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            trace!(cache = self.name, key = ?key, "Cache hit");
            return Ok(value);
        }

        let (state, is_leader) = self.get_or_create_in_flight(&key);
        if !is_leader {
            trace!(cache = self.name, key = ?key, "Joining in-flight fetch");
            return state.wait().await;
        }

        // A fetch may have completed between the cache check and claiming the slot.
        if let Some(value) = self.get(&key) {
            self.remove_in_flight(&key, &state);
            state.succeed(value.clone());
            return Ok(value);
        }

        let mut guard = InFlightGuard {
            cache: self,
            key: key.clone(),
            state: state.clone(),
            completed: false,
        };

        let result = fetch().await;
        guard.completed = true;
        drop(guard);

        let still_current = self.remove_in_flight(&key, &state);
        match result {
            Ok(value) => {
                if still_current {
                    self.insert(key, value.clone());
                }
                state.succeed(value.clone());
                Ok(value)
            }
            Err(e) => {
                state.fail(SharedFailure::from(&e));
                Err(e)
            }
        }
    }

    fn get_or_create_in_flight(&self, key: &K) -> (Arc<InFlightState<V>>, bool) {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            return (existing.clone(), false);
        }
        let state = Arc::new(InFlightState::new());
        in_flight.insert(key.clone(), state.clone());
        (state, true)
    }
}

impl<K: Eq + Hash, V: Clone> BlobCache<K, V> {
    /// Remove the in-flight slot if it still belongs to `state`.
    fn remove_in_flight(&self, key: &K, state: &Arc<InFlightState<V>>) -> bool {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(key) {
            Some(current) if Arc::ptr_eq(current, state) => {
                in_flight.remove(key);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut lru = BoundedLru::new(5);
        for id in 1..=6 {
            lru.insert(id, id * 10);
        }
        assert_eq!(lru.len(), 5);
        assert!(!lru.contains(&1));
        for id in 2..=6 {
            assert!(lru.contains(&id));
        }
    }

    #[test]
    fn test_lru_touch_changes_victim() {
        let mut lru = BoundedLru::new(3);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert("c", 3);
        assert_eq!(lru.get(&"a"), Some(&1));

        let evicted = lru.insert("d", 4);
        assert_eq!(evicted, vec![("b", 2)]);
        assert_eq!(lru.keys().copied().collect::<Vec<_>>(), vec!["c", "a", "d"]);
    }

    #[test]
    fn test_lru_replace_does_not_grow() {
        let mut lru = BoundedLru::new(2);
        lru.insert(1, "x");
        lru.insert(1, "y");
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.peek(&1), Some(&"y"));
        assert_eq!(lru.remove(&1), Some("y"));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_blob_cache_bound() {
        let cache: BlobCache<i64, Arc<Vec<u8>>> = BlobCache::new("raw", 5);
        for id in 1..=6 {
            cache.insert(id, Arc::new(vec![id as u8]));
        }
        assert_eq!(cache.len(), 5);
        assert!(!cache.contains(&1));
        assert_eq!(cache.keys(), vec![2, 3, 4, 5, 6]);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_success() {
        let cache: BlobCache<i64, u32> = BlobCache::new("raw", 5);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch(1, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_not_cached() {
        let cache: BlobCache<i64, u32> = BlobCache::new("raw", 5);

        let err = cache
            .get_or_fetch(1, || async { Err(DanmakuError::transport("boom")) })
            .await;
        assert!(err.is_err());
        assert!(!cache.contains(&1));
        assert_eq!(cache.in_flight_count(), 0);

        let ok = cache.get_or_fetch(1, || async { Ok(3) }).await.unwrap();
        assert_eq!(ok, 3);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_coalesce() {
        let cache: Arc<BlobCache<i64, u32>> = Arc::new(BlobCache::new("raw", 5));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(9, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(99)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let cache: Arc<BlobCache<i64, u32>> = Arc::new(BlobCache::new("raw", 5));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(1, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.has_in_flight(&1));

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_fetch(1, || async { Ok(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DanmakuError::Cancelled)));
        assert!(!cache.has_in_flight(&1));
    }

    #[tokio::test]
    async fn test_waiters_see_leader_error_kind() {
        let cache: Arc<BlobCache<i64, u32>> = Arc::new(BlobCache::new("raw", 5));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(4, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(DanmakuError::NoData { content_id: 4 })
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_fetch(4, || async { Ok(0) }).await })
        };

        assert!(matches!(
            leader.await.unwrap(),
            Err(DanmakuError::NoData { content_id: 4 })
        ));
        assert!(matches!(
            waiter.await.unwrap(),
            Err(DanmakuError::NoData { content_id: 4 })
        ));
        assert!(!cache.contains(&4));
    }

    #[tokio::test]
    async fn test_clear_cancels_waiters() {
        let cache: Arc<BlobCache<i64, u32>> = Arc::new(BlobCache::new("raw", 5));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(2, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(2)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_fetch(2, || async { Ok(0) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        cache.clear();
        assert!(matches!(waiter.await.unwrap(), Err(DanmakuError::Cancelled)));

        // The leader still returns its value but does not repopulate the cleared cache.
        assert_eq!(leader.await.unwrap().unwrap(), 2);
        assert!(!cache.contains(&2));
    }
}
