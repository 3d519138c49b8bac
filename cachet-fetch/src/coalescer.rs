//! Single-flight remote fetches in front of the cache store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use cachet_cache::CacheStore;
use cachet_core::error::{CachetError, Result};
use cachet_core::types::CacheValue;

type FetchOutcome = std::result::Result<CacheValue, Arc<CachetError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;
type PendingMap = Arc<Mutex<HashMap<String, SharedFetch>>>;

/// Wraps remote fetches with cache lookups and per-key coalescing.
///
/// For any key, at most one fetch is in flight. Callers arriving while it
/// runs attach to the same shared future and observe the same value or the
/// same error. Failures are not cached; the next call after a failure
/// starts a fresh fetch.
pub struct FetchCoalescer {
    store: Arc<CacheStore>,
    pending: PendingMap,
}

impl FetchCoalescer {
    /// Creates a coalescer over `store`.
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Returns the number of fetches currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if a fetch for `key` is in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Returns the cached value for `key`, fetching it if needed.
    ///
    /// With `force_refresh` the cache is bypassed, but an in-flight fetch for
    /// the same key is still joined rather than duplicated.
    ///
    /// `fetch` is called at most once, and only when this call starts the
    /// fetch. It is called after the pending slot is registered and the
    /// registry lock is released, so it may use this coalescer. The future
    /// it returns runs on a spawned task, so the fetch completes and clears
    /// its slot even if every caller stops waiting. There is no built-in
    /// timeout; wrap `fetch` in `tokio::time::timeout` if one is needed.
    #[instrument(skip(self, fetch))]
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        force_refresh: bool,
    ) -> Result<CacheValue>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<CacheValue>> + Send + 'static,
    {
        if !force_refresh {
            if let Some(value) = self.store.get(key) {
                debug!(key, "Cache hit");
                return Ok(value);
            }
        }

        let (shared, start) = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(existing) => {
                    debug!(key, "Joining in-flight fetch");
                    (existing.clone(), None)
                }
                None => {
                    // A fetch may have landed between the cache check and taking the lock.
                    if !force_refresh {
                        if let Some(value) = self.store.get(key) {
                            return Ok(value);
                        }
                    }
                    debug!(key, "Starting fetch");
                    let (tx, rx) = oneshot::channel();
                    let shared = waiter(rx);
                    pending.insert(key.to_string(), shared.clone());
                    (shared, Some(tx))
                }
            }
        };

        // The slot is registered; build the fetch outside the lock.
        if let Some(tx) = start {
            let slot = PendingSlot {
                pending: self.pending.clone(),
                key: key.to_string(),
            };
            let fut = fetch(key.to_string());
            self.spawn_fetch(slot, fut, tx);
        }

        shared.await.map_err(|source| CachetError::FetchFailed {
            key: key.to_string(),
            source,
        })
    }

    /// Typed form of [`get_or_fetch`](Self::get_or_fetch).
    pub async fn get_or_fetch_as<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        force_refresh: bool,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let value = self
            .get_or_fetch(
                key,
                move |key| {
                    let fut = fetch(key);
                    async move {
                        let value = fut.await?;
                        serde_json::to_value(value).map_err(CachetError::from)
                    }
                },
                force_refresh,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Spawns the fetch. The task writes the cache on success, then clears
    /// the pending slot, then resolves waiters.
    fn spawn_fetch<Fut>(&self, slot: PendingSlot, fut: Fut, tx: oneshot::Sender<FetchOutcome>)
    where
        Fut: Future<Output = Result<CacheValue>> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::spawn(async move {
            let result = fut.await;
            match &result {
                Ok(value) => store.set(&slot.key, value.clone()),
                Err(e) => warn!(key = %slot.key, error = %e, "Remote fetch failed"),
            }
            drop(slot);
            let _ = tx.send(result.map_err(Arc::new));
        });
    }
}

/// Shared future resolving to the outcome sent by the fetch task.
fn waiter(rx: oneshot::Receiver<FetchOutcome>) -> SharedFetch {
    async move {
        rx.await.unwrap_or_else(|_| {
            Err(Arc::new(CachetError::InternalError(
                "fetch task ended without a result".into(),
            )))
        })
    }
    .boxed()
    .shared()
}

/// Removes the pending entry when the fetch task ends, however it ends.
struct PendingSlot {
    pending: PendingMap,
    key: String,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use cachet_cache::CachePolicyRegistry;
    use futures::future::join_all;
    use serde::Deserialize;
    use serde_json::json;

    fn coalescer() -> FetchCoalescer {
        FetchCoalescer::new(Arc::new(CacheStore::new(CachePolicyRegistry::standard())))
    }

    fn counting_fetch(
        calls: Arc<AtomicUsize>,
        value: CacheValue,
        delay: Duration,
    ) -> impl FnOnce(String) -> BoxFuture<'static, Result<CacheValue>> {
        move |_key| {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let value = coalescer
            .get_or_fetch("catalog:c1", counting_fetch(calls.clone(), json!("v"), Duration::ZERO), false)
            .await
            .unwrap();

        assert_eq!(value, json!("v"));
        assert_eq!(coalescer.store().get("catalog:c1"), Some(json!("v")));
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let coalescer = coalescer();
        coalescer.store().set("catalog:c1", json!("cached"));
        let calls = Arc::new(AtomicUsize::new(0));

        let value = coalescer
            .get_or_fetch("catalog:c1", counting_fetch(calls.clone(), json!("fresh"), Duration::ZERO), false)
            .await
            .unwrap();

        assert_eq!(value, json!("cached"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let coalescer = coalescer();
        coalescer.store().set("catalog:c1", json!("stale"));
        let calls = Arc::new(AtomicUsize::new(0));

        let value = coalescer
            .get_or_fetch("catalog:c1", counting_fetch(calls.clone(), json!("fresh"), Duration::ZERO), true)
            .await
            .unwrap();

        assert_eq!(value, json!("fresh"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.store().get("catalog:c1"), Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let futures = (0..10).map(|_| {
            coalescer.get_or_fetch(
                "offering:c1:o1",
                counting_fetch(calls.clone(), json!({"name": "x"}), Duration::from_millis(50)),
                false,
            )
        });
        let results = join_all(futures).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 10);
        for result in results {
            assert_eq!(result.unwrap(), json!({"name": "x"}));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_share_one_fetch() {
        let coalescer = Arc::new(coalescer());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let coalescer = coalescer.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    coalescer
                        .get_or_fetch(
                            "flavors:c1:o1",
                            counting_fetch(calls, json!([1, 2]), Duration::from_millis(100)),
                            false,
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!([1, 2]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_shared_and_not_cached() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let futures = (0..5).map(|_| {
            let calls = calls.clone();
            coalescer.get_or_fetch(
                "catalog:c1",
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<CacheValue, _>(CachetError::Remote("503".into()))
                },
                false,
            )
        });
        let results = join_all(futures).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let sources: Vec<Arc<CachetError>> = results
            .into_iter()
            .map(|r| match r {
                Err(CachetError::FetchFailed { source, .. }) => source,
                other => panic!("expected FetchFailed, got {:?}", other),
            })
            .collect();
        for source in &sources[1..] {
            assert!(Arc::ptr_eq(&sources[0], source));
        }

        assert!(coalescer.store().get("catalog:c1").is_none());
        assert_eq!(coalescer.pending_count(), 0);

        // The slot is free again, so the next call retries.
        let value = coalescer
            .get_or_fetch("catalog:c1", counting_fetch(calls.clone(), json!("ok"), Duration::ZERO), false)
            .await
            .unwrap();
        assert_eq!(value, json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_completes() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let attempt = tokio::time::timeout(
            Duration::from_millis(5),
            coalescer.get_or_fetch(
                "catalog:c1",
                counting_fetch(calls.clone(), json!("late"), Duration::from_millis(50)),
                false,
            ),
        )
        .await;
        assert!(attempt.is_err());
        assert!(coalescer.is_pending("catalog:c1"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!coalescer.is_pending("catalog:c1"));
        assert_eq!(coalescer.store().get("catalog:c1"), Some(json!("late")));
    }

    #[tokio::test]
    async fn test_fetch_closure_may_use_coalescer() {
        let coalescer = coalescer();

        let value = tokio::time::timeout(
            Duration::from_secs(1),
            coalescer.get_or_fetch(
                "catalog:c1",
                |key| {
                    let registered = coalescer.is_pending(&key);
                    let in_flight = coalescer.pending_count();
                    async move { Ok(json!({ "registered": registered, "in_flight": in_flight })) }
                },
                false,
            ),
        )
        .await
        .expect("fetch closure must not block on the pending registry")
        .unwrap();

        assert_eq!(value, json!({ "registered": true, "in_flight": 1 }));
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_fetch_clears_slot() {
        let coalescer = Arc::new(coalescer());
        let inner = coalescer.clone();

        let outcome = tokio::spawn(async move {
            inner
                .get_or_fetch(
                    "catalog:c1",
                    |_| -> BoxFuture<'static, Result<CacheValue>> { panic!("setup failed") },
                    false,
                )
                .await
        })
        .await;

        assert!(outcome.is_err());
        assert_eq!(coalescer.pending_count(), 0);
        let value = coalescer
            .get_or_fetch("catalog:c1", |_| async { Ok(json!("ok")) }, false)
            .await
            .unwrap();
        assert_eq!(value, json!("ok"));
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let coalescer = coalescer();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coalescer.get_or_fetch("catalog:a", counting_fetch(calls.clone(), json!("a"), Duration::from_millis(10)), false),
            coalescer.get_or_fetch("catalog:b", counting_fetch(calls.clone(), json!("b"), Duration::from_millis(10)), false),
        );

        assert_eq!(a.unwrap(), json!("a"));
        assert_eq!(b.unwrap(), json!("b"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_typed_fetch() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Flavor {
            name: String,
        }

        let coalescer = coalescer();
        let flavors: Vec<Flavor> = coalescer
            .get_or_fetch_as(
                "flavors:c1:o1",
                |_| async { Ok(vec![Flavor { name: "standard".into() }]) },
                false,
            )
            .await
            .unwrap();

        assert_eq!(flavors, vec![Flavor { name: "standard".into() }]);
        assert_eq!(
            coalescer.store().get("flavors:c1:o1"),
            Some(json!([{"name": "standard"}]))
        );
    }
}
