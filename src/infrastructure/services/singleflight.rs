//! Single-load coordination for cache misses
//!
//! On a miss every caller races for the key's lease. The winner re-checks the
//! cache, runs the loader, publishes the result and releases the lease.
//! Everyone else polls the cache until the value shows up. A waiter that
//! sees the lease released with nothing published (the load failed or was
//! empty) races for the lease again. If the wait window
//! (`lock_timeout + wait_grace`) runs out while the lease is still held, the
//! waiter runs the loader itself. That last step means a stalled holder can lead to more than
//! one load: availability wins over exactly-once execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::cache::{CacheOptions, CacheStore, MAX_TTL};
use crate::infrastructure::lease::{Lease, LeaseManager};
use crate::infrastructure::observability::metrics::{self, LoadPath};

/// Default delay between waiter polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default extra wait on top of the lock timeout
pub const DEFAULT_WAIT_GRACE: Duration = Duration::from_secs(1);

/// Configuration for miss coordination
#[derive(Debug, Clone)]
pub struct SingleflightConfig {
    /// Delay between cache polls while another caller holds the lease
    pub poll_interval: Duration,
    /// Added to the lock timeout to size the waiter's poll window
    pub wait_grace: Duration,
}

impl Default for SingleflightConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_grace: DEFAULT_WAIT_GRACE,
        }
    }
}

impl SingleflightConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_wait_grace(mut self, wait_grace: Duration) -> Self {
        self.wait_grace = wait_grace;
        self
    }
}

/// Coordinates loaders so that one caller per key does the work
#[derive(Debug, Clone)]
pub struct Singleflight {
    store: Arc<dyn CacheStore>,
    leases: LeaseManager,
    config: SingleflightConfig,
}

impl Singleflight {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        let leases = LeaseManager::new(store.clone());
        Self::with_config(store, leases, SingleflightConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn CacheStore>,
        leases: LeaseManager,
        config: SingleflightConfig,
    ) -> Self {
        Self {
            store,
            leases,
            config,
        }
    }

    pub fn config(&self) -> &SingleflightConfig {
        &self.config
    }

    /// Resolves a miss on `key`, loading through `loader` at most once per
    /// lease holder
    ///
    /// Only the loader's own error is returned; every store failure degrades
    /// to a miss or a skipped write.
    pub async fn load<V, E, F, Fut>(
        &self,
        key: &str,
        lock_key: &str,
        options: &CacheOptions,
        loader: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.leases.acquire(lock_key, options.lock_timeout).await {
            Ok(Some(lease)) => self.load_as_holder(key, lease, options, loader).await,
            Ok(None) => self.wait_for_value(key, lock_key, options, loader).await,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Lease unavailable, loading without coordination"
                );
                metrics::record_store_error("set_if_absent");
                self.load_and_store(key, options, loader, LoadPath::Degraded)
                    .await
            }
        }
    }

    async fn load_as_holder<V, E, F, Fut>(
        &self,
        key: &str,
        lease: Lease,
        options: &CacheOptions,
        loader: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Someone may have published between our miss and the acquire
        let result = match read_cached(self.store.as_ref(), key).await {
            Some(value) => {
                tracing::debug!(key = %key, "Value published before lease was acquired");
                metrics::record_cache_hit();
                Ok(value)
            }
            None => self.load_and_store(key, options, loader, LoadPath::Holder).await,
        };

        lease.release().await;
        result
    }

    async fn wait_for_value<V, E, F, Fut>(
        &self,
        key: &str,
        lock_key: &str,
        options: &CacheOptions,
        loader: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let window = options
            .lock_timeout
            .saturating_add(self.config.wait_grace)
            .min(MAX_TTL);
        let deadline = Instant::now() + window;

        loop {
            let next_poll = (Instant::now() + self.config.poll_interval).min(deadline);
            tokio::time::sleep_until(next_poll).await;

            if let Some(value) = read_cached(self.store.as_ref(), key).await {
                tracing::debug!(key = %key, "Value published by lease holder");
                metrics::record_cache_hit();
                return Ok(value);
            }

            // Released with nothing published: the holder's load failed or
            // was not cached, so try to become the holder
            if self.lease_released(lock_key).await {
                match self.leases.acquire(lock_key, options.lock_timeout).await {
                    Ok(Some(lease)) => {
                        tracing::debug!(key = %key, "Lease released without a value, loading as new holder");
                        return self.load_as_holder(key, lease, options, loader).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Lease retry failed");
                        metrics::record_store_error("set_if_absent");
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        tracing::warn!(
            key = %key,
            waited_ms = window.as_millis() as u64,
            "Lease holder may have failed, executing loader directly"
        );

        // The holder may still publish; leave the write to it
        let started = Instant::now();
        let value = loader().await?;
        metrics::record_load(LoadPath::Fallback, started.elapsed());

        Ok(value)
    }

    /// Whether the lock key is confirmed absent; a failed read counts as held
    async fn lease_released(&self, lock_key: &str) -> bool {
        match self.store.get_raw(lock_key).await {
            Ok(holder) => holder.is_none(),
            Err(e) => {
                tracing::warn!(lock_key = %lock_key, error = %e, "Lease check failed");
                metrics::record_store_error("get");
                false
            }
        }
    }

    async fn load_and_store<V, E, F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        loader: F,
        path: LoadPath,
    ) -> Result<V, E>
    where
        V: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let started = Instant::now();
        let value = loader().await?;
        metrics::record_load(path, started.elapsed());

        write_cached(self.store.as_ref(), key, &value, options).await;

        Ok(value)
    }
}

/// Reads and decodes `key`; store failures and undecodable values read as misses
pub(crate) async fn read_cached<V>(store: &dyn CacheStore, key: &str) -> Option<V>
where
    V: DeserializeOwned,
{
    let raw = match store.get_raw(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            metrics::record_store_error("get");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cached value has unexpected shape, treating as miss");
            None
        }
    }
}

/// Writes `value` under `key` unless the empty-value policy skips it
///
/// Returns whether the value was written.
pub(crate) async fn write_cached<V>(
    store: &dyn CacheStore,
    key: &str,
    value: &V,
    options: &CacheOptions,
) -> bool
where
    V: Serialize + ?Sized,
{
    let json = match serde_json::to_value(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Value is not serializable, skipping cache write");
            return false;
        }
    };

    if !options.should_cache(&json) {
        tracing::debug!(key = %key, "Empty value, skipping cache write");
        metrics::record_write_skipped();
        return false;
    }

    match store.set_raw(key, &json.to_string(), options.expire).await {
        Ok(()) => {
            tracing::info!(key = %key, expire_secs = options.expire.as_secs(), "Cache set");
            true
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
            metrics::record_store_error("set");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::{CacheExt, TestCacheStore};
    use crate::infrastructure::cache::InMemoryCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct LoaderFailed;

    fn fast_config() -> SingleflightConfig {
        SingleflightConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_wait_grace(Duration::from_millis(50))
    }

    fn coordinator(store: Arc<dyn CacheStore>) -> Singleflight {
        let leases = LeaseManager::new(store.clone());
        Singleflight::with_config(store, leases, fast_config())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_load_once() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = CacheOptions::default();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flight = flight.clone();
            let calls = calls.clone();
            let options = options.clone();

            handles.push(tokio::spawn(async move {
                flight
                    .load("cat:list", "lock:cat:list", &options, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, LoaderFailed>(vec!["tabby".to_string(), "calico".to_string()])
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value, vec!["tabby".to_string(), "calico".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get_raw("lock:cat:list").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_holder_publishes_value() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());

        let value: u32 = flight
            .load("answer", "lock:answer", &CacheOptions::default(), || async {
                Ok::<_, LoaderFailed>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        let cached: Option<u32> = store.get("answer").await.unwrap();
        assert_eq!(cached, Some(42));
        assert!(store.ttl("answer").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_holder_double_checks_cache() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        store.set("book:1", &"cached", Duration::from_secs(60)).await.unwrap();
        let flight = coordinator(store.clone());
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let value: String = flight
            .load("book:1", "lock:book:1", &CacheOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, LoaderFailed>("loaded".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_check_hit_is_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let value: String = ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
                store.set("book:2", &"cached", Duration::from_secs(60)).await.unwrap();

                coordinator(store)
                    .load("book:2", "lock:book:2", &CacheOptions::default(), || async {
                        Ok::<_, LoaderFailed>("loaded".to_string())
                    })
                    .await
                    .unwrap()
            })
        });

        assert_eq!(value, "cached");
        assert!(handle.render().contains("cache_hits_total 1"));
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());

        let result: Result<String, _> = flight
            .load("broken", "lock:broken", &CacheOptions::default(), || async {
                Err(LoaderFailed)
            })
            .await;

        assert_eq!(result, Err(LoaderFailed));
        assert!(store.get_raw("broken").await.unwrap().is_none());
        // Lease released on the error path too
        assert!(store.get_raw("lock:broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_result_is_not_written() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());

        let value: Vec<String> = flight
            .load("cat:none", "lock:cat:none", &CacheOptions::default(), || async {
                Ok::<_, LoaderFailed>(Vec::new())
            })
            .await
            .unwrap();

        assert!(value.is_empty());
        assert!(store.get_raw("cat:none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_result_written_when_opted_in() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let options = CacheOptions::default().cache_empty();

        let _: Option<String> = flight
            .load("user:missing", "lock:user:missing", &options, || async {
                Ok::<_, LoaderFailed>(None)
            })
            .await
            .unwrap();

        assert_eq!(
            store.get_raw("user:missing").await.unwrap(),
            Some("null".to_string())
        );
    }

    #[tokio::test]
    async fn test_waiter_picks_up_published_value() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let leases = LeaseManager::new(store.clone());
        let options = CacheOptions::default().with_lock_timeout(Duration::from_secs(2));

        let holder = leases
            .acquire("lock:slow", Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();

        let publisher = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                store.set("slow", &7u32, Duration::from_secs(60)).await.unwrap();
                holder.release().await;
            })
        };

        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let value: u32 = flight
            .load("slow", "lock:slow", &options, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, LoaderFailed>(0)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_falls_back_after_timeout() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let options = CacheOptions::default().with_lock_timeout(Duration::from_millis(100));

        // A holder that never publishes and never releases
        store
            .set_if_absent("lock:stuck", "someone-else", Duration::from_secs(30))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let value: String = flight
            .load("stuck", "lock:stuck", &options, || async {
                Ok::<_, LoaderFailed>("direct".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "direct");
        assert!(started.elapsed() >= Duration::from_millis(150));
        // Fallback leaves publishing to the holder
        assert!(store.get_raw("stuck").await.unwrap().is_none());
    }

    async fn run_concurrent<V>(
        flight: &Singleflight,
        callers: usize,
        options: &CacheOptions,
        calls: &Arc<AtomicUsize>,
        result: Result<V, LoaderFailed>,
    ) -> Duration
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let started = std::time::Instant::now();

        let tasks: Vec<_> = (0..callers)
            .map(|_| {
                let flight = flight.clone();
                let options = options.clone();
                let calls = calls.clone();
                let result = match &result {
                    Ok(value) => Ok(value.clone()),
                    Err(_) => Err(LoaderFailed),
                };

                tokio::spawn(async move {
                    let _ = flight
                        .load("cat:list", "lock:cat:list", &options, move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            result
                        })
                        .await;
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        started.elapsed()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_take_over_after_empty_load() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let options = CacheOptions::default().with_lock_timeout(Duration::from_secs(2));
        let calls = Arc::new(AtomicUsize::new(0));

        let elapsed = run_concurrent(&flight, 4, &options, &calls, Ok(Vec::<String>::new())).await;

        // Well under the 2s + grace window
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(store.get_raw("lock:cat:list").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_take_over_after_failed_load() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let options = CacheOptions::default().with_lock_timeout(Duration::from_secs(2));
        let calls = Arc::new(AtomicUsize::new(0));

        let elapsed = run_concurrent::<u32>(&flight, 4, &options, &calls, Err(LoaderFailed)).await;

        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_huge_lock_timeout_does_not_overflow() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let flight = coordinator(store.clone());
        let options = CacheOptions::default().with_lock_timeout(Duration::MAX);

        store
            .set("huge", &5u32, Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set_if_absent("lock:huge", "someone-else", Duration::from_secs(30))
            .await
            .unwrap();

        let value: u32 = flight
            .load("huge", "lock:huge", &options, || async { Ok::<_, LoaderFailed>(0) })
            .await
            .unwrap();

        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_direct_load() {
        let store = Arc::new(TestCacheStore::new().with_error("connection refused"));
        let flight = coordinator(store.clone());
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let value: u32 = flight
            .load("book:42", "lock:book:42", &CacheOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, LoaderFailed>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_cached_treats_bad_shape_as_miss() {
        let store = TestCacheStore::new().with_entry("book:1", &"not a number", Duration::from_secs(60));

        let value: Option<u32> = read_cached(&store, "book:1").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_write_cached_reports_store_failure() {
        let store = TestCacheStore::new().with_error("read-only replica");

        let written = write_cached(&store, "book:1", &42u32, &CacheOptions::default()).await;
        assert!(!written);
    }

    #[tokio::test]
    async fn test_write_cached_uses_expire() {
        let store = InMemoryCacheStore::new();
        let options = CacheOptions::default().with_expire(Duration::from_secs(60));

        assert!(write_cached(&store, "book:1", &42u32, &options).await);

        let ttl = store.ttl("book:1").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(55));
    }

    #[test]
    fn test_config_defaults() {
        let config = SingleflightConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.wait_grace, Duration::from_secs(1));

        let config = config.with_poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
    }
}
