//! Capacity- and TTL-bounded cache with LRU eviction.
//!
//! Expiry is lazy: an entry past its TTL stays in memory until the next read
//! of that key (or until LRU pressure evicts it), but it is never returned.
//!
//! Every operation takes the same lock. `get_or_compute` holds it while the
//! compute future runs, so a slow remote fetch blocks all other access to
//! this cache instance until its result is stored. The compute future must
//! not call back into the same cache.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// One stored value with its insertion time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.inserted_at.elapsed() >= ttl,
            None => false,
        }
    }
}

/// Fixed-capacity key/value store with TTL expiry and LRU eviction.
#[derive(Debug)]
pub struct BoundedCache<K: Hash + Eq, V> {
    name: &'static str,
    ttl: Option<Duration>,
    inner: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    /// `ttl = None` disables expiry.
    pub fn new(name: &'static str, capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.cap().get()
    }

    /// Fresh value for `key`, touching its recency.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        Self::fresh(&mut inner, key, self.ttl)
    }

    /// Insert or overwrite, evicting the least-recently-used entry when full.
    pub async fn set(&self, key: K, value: V) {
        self.inner.lock().await.put(key, CacheEntry::new(value));
    }

    /// Overwrite `key` only if a fresh entry already exists.
    ///
    /// Returns whether the value was replaced.
    pub async fn replace_if_present(&self, key: K, value: V) -> bool {
        let mut inner = self.inner.lock().await;
        if Self::fresh(&mut inner, &key, self.ttl).is_none() {
            return false;
        }
        inner.put(key, CacheEntry::new(value));
        true
    }

    /// Return the fresh value for `key`, or run `compute`, store and return its result.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let mut inner = self.inner.lock().await;
        if let Some(value) = Self::fresh(&mut inner, &key, self.ttl) {
            return value;
        }
        let value = compute().await;
        inner.put(key, CacheEntry::new(value.clone()));
        value
    }

    /// Fallible `get_or_compute`. On `Err` nothing is stored.
    pub async fn try_get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut inner = self.inner.lock().await;
        if let Some(value) = Self::fresh(&mut inner, &key, self.ttl) {
            return Ok(value);
        }
        let value = compute().await?;
        inner.put(key, CacheEntry::new(value.clone()));
        Ok(value)
    }

    pub async fn delete(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let entry = inner.pop(key)?;
        if entry.is_expired(self.ttl) {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Whether a fresh entry exists. Does not touch recency.
    pub async fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().await;
        inner
            .peek(key)
            .map(|entry| !entry.is_expired(self.ttl))
            .unwrap_or(false)
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<K> = inner
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.pop(key);
        }
        expired.len()
    }

    /// Fresh entries, most recently used first. Does not touch recency.
    pub async fn snapshot(&self) -> Vec<(K, V)> {
        let inner = self.inner.lock().await;
        inner
            .iter()
            .filter(|(_, entry)| !entry.is_expired(self.ttl))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    fn fresh(inner: &mut LruCache<K, CacheEntry<V>>, key: &K, ttl: Option<Duration>) -> Option<V> {
        let expired = match inner.get(key) {
            Some(entry) if !entry.is_expired(ttl) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.pop(key);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = BoundedCache::new("test", 10, Some(Duration::from_secs(60)));
        cache.set(key("a"), 1).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key("a")).await, Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key("a")).await, None);
        assert!(!cache.contains(&key("a")).await);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_restarts_ttl() {
        let cache = BoundedCache::new("test", 10, Some(Duration::from_secs(60)));
        cache.set(key("a"), 1).await;
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.set(key("a"), 2).await;
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(cache.get(&key("a")).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_do_not_extend_ttl() {
        let cache = BoundedCache::new("test", 10, Some(Duration::from_secs(60)));
        cache.set(key("a"), 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get(&key("a")).await, Some(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get(&key("a")).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ttl_never_expires() {
        let cache = BoundedCache::new("test", 10, None);
        cache.set(key("a"), 1).await;
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(cache.get(&key("a")).await, Some(1));
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_accessed() {
        let cache = BoundedCache::new("test", 3, None);
        cache.set(key("a"), 1).await;
        cache.set(key("b"), 2).await;
        cache.set(key("c"), 3).await;

        // touch the oldest key so "b" becomes least recently used
        assert_eq!(cache.get(&key("a")).await, Some(1));
        cache.set(key("d"), 4).await;

        assert_eq!(cache.get(&key("b")).await, None);
        assert_eq!(cache.get(&key("a")).await, Some(1));
        assert_eq!(cache.get(&key("c")).await, Some(3));
        assert_eq!(cache.get(&key("d")).await, Some(4));
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_contains_does_not_touch_recency() {
        let cache = BoundedCache::new("test", 2, None);
        cache.set(key("a"), 1).await;
        cache.set(key("b"), 2).await;
        assert!(cache.contains(&key("a")).await);
        cache.set(key("c"), 3).await;
        assert!(!cache.contains(&key("a")).await);
    }

    #[tokio::test]
    async fn test_get_or_compute_runs_once() {
        let cache = BoundedCache::new("test", 10, None);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute(key("a"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    42
                })
                .await;
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_try_get_or_compute_error_commits_nothing() {
        let cache: BoundedCache<String, u32> = BoundedCache::new("test", 10, None);
        let result: Result<u32, &str> = cache
            .try_get_or_compute(key("a"), || async { Err("boom") })
            .await;
        assert_eq!(result, Err("boom"));
        assert!(!cache.contains(&key("a")).await);

        let result: Result<u32, &str> = cache.try_get_or_compute(key("a"), || async { Ok(5) }).await;
        assert_eq!(result, Ok(5));
        assert_eq!(cache.get(&key("a")).await, Some(5));
    }

    #[tokio::test]
    async fn test_compute_blocks_other_keys() {
        let cache = Arc::new(BoundedCache::new("test", 10, None));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<u32>();

        let worker = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key("slow"), || async move {
                        let _ = started_tx.send(());
                        release_rx.await.unwrap_or(0)
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), cache.get(&key("other"))).await;
        assert!(blocked.is_err(), "unrelated key should wait for the compute");

        release_tx.send(9).unwrap();
        assert_eq!(worker.await.unwrap(), 9);
        assert_eq!(cache.get(&key("slow")).await, Some(9));
    }

    #[tokio::test]
    async fn test_replace_if_present() {
        let cache = BoundedCache::new("test", 10, None);
        assert!(!cache.replace_if_present(key("a"), 1).await);
        assert!(!cache.contains(&key("a")).await);

        cache.set(key("a"), 1).await;
        assert!(cache.replace_if_present(key("a"), 2).await);
        assert_eq!(cache.get(&key("a")).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_and_purge_skip_expired() {
        let cache = BoundedCache::new("test", 10, Some(Duration::from_secs(10)));
        cache.set(key("old"), 1).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set(key("new"), 2).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.snapshot().await, vec![(key("new"), 2)]);
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = BoundedCache::new("test", 10, None);
        cache.set(key("a"), 1).await;
        assert_eq!(cache.delete(&key("a")).await, Some(1));
        assert_eq!(cache.delete(&key("a")).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_capacity_holds_one() {
        let cache = BoundedCache::new("test", 0, None);
        assert_eq!(cache.capacity().await, 1);
        cache.set(key("a"), 1).await;
        cache.set(key("b"), 2).await;
        assert_eq!(cache.len().await, 1);
    }
}
