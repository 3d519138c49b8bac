//! Speculative cache warming.
//!
//! Lookups are admitted under per-type caps, queued FIFO, and drained in
//! bounded parallel batches with a fixed-delay retry. Nothing here reports
//! errors to the caller: failures are logged and the item is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use cachet_cache::CacheStore;
use cachet_core::error::{CachetError, Result};
use cachet_core::traits::RemoteFetcher;
use cachet_core::types::key::offerings_key;
use cachet_core::types::{CacheValue, LookupItem, LookupType};

use crate::coalescer::FetchCoalescer;
use crate::config::PrefetchConfig;
use crate::throttle::Throttle;

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one [`PrefetchQueue::enqueue_lookups`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueReport {
    /// Items appended to the queue
    pub admitted: usize,
    /// Items skipped because their key was already cached
    pub already_cached: usize,
    /// Items dropped by the per-type cap
    pub over_limit: usize,
}

/// Lifetime counters of a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchStats {
    /// Items admitted
    pub enqueued: u64,
    /// Items skipped as already cached
    pub dropped_cached: u64,
    /// Items dropped by admission caps
    pub dropped_over_limit: u64,
    /// Items whose value landed in the cache
    pub succeeded: u64,
    /// Items dropped after their last attempt failed
    pub exhausted: u64,
    /// Fetch attempts made, retries included
    pub attempts: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped_cached: AtomicU64,
    dropped_over_limit: AtomicU64,
    succeeded: AtomicU64,
    exhausted: AtomicU64,
    attempts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PrefetchStats {
        PrefetchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_cached: self.dropped_cached.load(Ordering::Relaxed),
            dropped_over_limit: self.dropped_over_limit.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUEUE
// ═══════════════════════════════════════════════════════════════════════════════

struct QueueInner {
    coalescer: Arc<FetchCoalescer>,
    fetchers: HashMap<LookupType, Arc<dyn RemoteFetcher>>,
    config: PrefetchConfig,
    queue: Mutex<VecDeque<LookupItem>>,
    processing: AtomicBool,
    counters: Counters,
    idle: Notify,
}

/// Background prefetch queue.
///
/// Must be used from within a Tokio runtime: processing runs on spawned
/// tasks, and items enqueued outside a runtime stay queued until the next
/// enqueue made inside one.
pub struct PrefetchQueue {
    inner: Arc<QueueInner>,
    throttle: Throttle,
}

/// Builder for [`PrefetchQueue`].
pub struct PrefetchQueueBuilder {
    coalescer: Arc<FetchCoalescer>,
    config: PrefetchConfig,
    fetchers: HashMap<LookupType, Arc<dyn RemoteFetcher>>,
}

impl PrefetchQueueBuilder {
    /// Replaces the configuration.
    pub fn config(mut self, config: PrefetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the remote fetcher for one lookup type.
    pub fn fetcher(mut self, lookup_type: LookupType, fetcher: impl RemoteFetcher + 'static) -> Self {
        self.fetchers.insert(lookup_type, Arc::new(fetcher));
        self
    }

    /// Registers a shared remote fetcher for one lookup type.
    pub fn shared_fetcher(mut self, lookup_type: LookupType, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetchers.insert(lookup_type, fetcher);
        self
    }

    /// Builds the queue.
    pub fn build(self) -> PrefetchQueue {
        let window = self.config.throttle_window_duration();
        let inner = Arc::new(QueueInner {
            coalescer: self.coalescer,
            fetchers: self.fetchers,
            config: self.config,
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            counters: Counters::default(),
            idle: Notify::new(),
        });

        let weak: Weak<QueueInner> = Arc::downgrade(&inner);
        let throttle = Throttle::new(window, move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(inner.drain());
            }
        });

        PrefetchQueue { inner, throttle }
    }
}

impl PrefetchQueue {
    /// Starts building a queue that writes through `coalescer`.
    pub fn builder(coalescer: Arc<FetchCoalescer>) -> PrefetchQueueBuilder {
        PrefetchQueueBuilder {
            coalescer,
            config: PrefetchConfig::default(),
            fetchers: HashMap::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }

    /// Returns the store prefetched values land in.
    pub fn store(&self) -> &Arc<CacheStore> {
        self.inner.coalescer.store()
    }

    /// Admits `items` and triggers processing.
    ///
    /// Items whose key is already cached are skipped. Of the rest, at most
    /// the configured cap per lookup type is admitted from this call; the
    /// overflow is dropped, not deferred.
    pub fn enqueue_lookups(&self, items: impl IntoIterator<Item = LookupItem>) -> EnqueueReport {
        let inner = &self.inner;
        let store = inner.coalescer.store();
        let mut report = EnqueueReport::default();
        let mut per_type: HashMap<LookupType, usize> = HashMap::new();
        let mut admitted = Vec::new();

        for item in items {
            if let Some(key) = item.cache_key() {
                if store.contains(&key) {
                    report.already_cached += 1;
                    continue;
                }
            }

            let count = per_type.entry(item.lookup_type).or_default();
            if *count >= inner.config.max_items_for(item.lookup_type) {
                report.over_limit += 1;
                continue;
            }
            *count += 1;
            admitted.push(item);
        }

        report.admitted = admitted.len();
        let counters = &inner.counters;
        counters.enqueued.fetch_add(report.admitted as u64, Ordering::Relaxed);
        counters
            .dropped_cached
            .fetch_add(report.already_cached as u64, Ordering::Relaxed);
        counters
            .dropped_over_limit
            .fetch_add(report.over_limit as u64, Ordering::Relaxed);

        if report.over_limit > 0 {
            debug!(over_limit = report.over_limit, "Dropped lookups over the per-type cap");
        }

        if !admitted.is_empty() {
            inner.queue.lock().extend(admitted);
            debug!(admitted = report.admitted, "Queued prefetch lookups");
            self.throttle.trigger();
        }

        report
    }

    /// Warms a catalog: queues the catalog itself, fetches its offering list
    /// directly, then queues the flavors of every offering found.
    ///
    /// Failures are logged and never returned.
    #[instrument(skip(self))]
    pub async fn prefetch_catalog_data(&self, catalog_id: &str) {
        self.enqueue_lookups([LookupItem::catalog(catalog_id)]);

        let Some(fetcher) = self.inner.fetchers.get(&LookupType::Offerings).cloned() else {
            warn!("No offerings fetcher registered; skipping flavor prefetch");
            return;
        };

        let lookup = LookupItem::offerings(catalog_id);
        let result = self
            .inner
            .coalescer
            .get_or_fetch(
                &offerings_key(catalog_id),
                move |_| async move { fetcher.fetch(&lookup).await },
                false,
            )
            .await;

        match result {
            Ok(offerings) => {
                let items: Vec<_> = offering_ids(&offerings)
                    .into_iter()
                    .map(|offering_id| LookupItem::flavors(catalog_id, offering_id))
                    .collect();
                let found = items.len();
                let report = self.enqueue_lookups(items);
                info!(
                    offerings = found,
                    admitted = report.admitted,
                    "Queued flavor prefetch for catalog"
                );
            }
            Err(e) => warn!(error = %e, "Failed to fetch offerings for prefetch"),
        }
    }

    /// Returns the number of queued items not yet taken by a drain pass.
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Returns true while a drain pass runs.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Drops queued items. Items already in flight are unaffected.
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut queue = self.inner.queue.lock();
            let cleared = queue.len();
            queue.clear();
            cleared
        };
        if !self.is_processing() {
            self.inner.idle.notify_waiters();
        }
        cleared
    }

    /// Returns a snapshot of the lifetime counters.
    pub fn stats(&self) -> PrefetchStats {
        self.inner.counters.snapshot()
    }

    /// Waits until the queue is empty and no drain pass is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl QueueInner {
    fn is_idle(&self) -> bool {
        !self.processing.load(Ordering::Acquire) && self.queue.lock().is_empty()
    }

    /// Runs drain passes until the queue is empty. Only one runs at a time.
    async fn drain(self: Arc<Self>) {
        let batch_size = self.config.batch_size();

        loop {
            if self
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            loop {
                let batch: Vec<LookupItem> = {
                    let mut queue = self.queue.lock();
                    let take = queue.len().min(batch_size);
                    queue.drain(..take).collect()
                };
                if batch.is_empty() {
                    break;
                }
                debug!(batch = batch.len(), "Prefetch pass");
                join_all(batch.into_iter().map(|item| self.process_item(item))).await;
            }

            self.processing.store(false, Ordering::Release);

            // An enqueue may have landed after the last batch while the guard was held.
            if self.queue.lock().is_empty() {
                self.idle.notify_waiters();
                return;
            }
        }
    }

    async fn process_item(&self, item: LookupItem) {
        let attempts = self.config.attempts();

        for attempt in 1..=attempts {
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            match self.attempt(&item).await {
                Ok(()) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(lookup = %item.lookup_type, value = %item.value, attempt, "Prefetched");
                    return;
                }
                Err(e) if attempt < attempts => {
                    debug!(
                        lookup = %item.lookup_type,
                        value = %item.value,
                        attempt,
                        error = %e,
                        "Prefetch attempt failed; retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay_duration()).await;
                }
                Err(e) => {
                    self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        lookup = %item.lookup_type,
                        value = %item.value,
                        attempts,
                        error = %e,
                        "Prefetch retries exhausted; dropping item"
                    );
                }
            }
        }
    }

    /// One fetch attempt. The value is written to the store by the coalescer,
    /// so a direct read of the same key in flight is joined, not repeated.
    async fn attempt(&self, item: &LookupItem) -> Result<()> {
        item.validate()?;
        let key = item.cache_key().ok_or_else(|| {
            CachetError::InvalidKey(format!("{} lookup '{}'", item.lookup_type, item.value))
        })?;
        let fetcher = self
            .fetchers
            .get(&item.lookup_type)
            .cloned()
            .ok_or_else(|| CachetError::FetcherNotRegistered(item.lookup_type.to_string()))?;

        let lookup = item.clone();
        self.coalescer
            .get_or_fetch(&key, move |_| async move { fetcher.fetch(&lookup).await }, false)
            .await?;
        Ok(())
    }
}

/// Extracts offering ids from an offering-list payload.
///
/// Accepts a bare array or an object wrapping one under `resources` or
/// `offerings`. Elements are id strings or objects with an `id` field.
fn offering_ids(value: &CacheValue) -> Vec<String> {
    let list = match value {
        CacheValue::Array(list) => Some(list),
        CacheValue::Object(map) => ["resources", "offerings"]
            .iter()
            .find_map(|field| map.get(*field).and_then(CacheValue::as_array)),
        _ => None,
    };

    list.map(|list| {
        list.iter()
            .filter_map(|entry| match entry {
                CacheValue::String(id) => Some(id.clone()),
                CacheValue::Object(map) => map.get("id").and_then(CacheValue::as_str).map(str::to_string),
                _ => None,
            })
            .filter(|id| !id.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
