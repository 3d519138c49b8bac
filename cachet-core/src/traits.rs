//! Common traits for Cachet.
//!
//! These are the seams to the host environment: where durable records live
//! and how remote resources are fetched. The caching layer never knows how
//! either is implemented.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CacheValue, LookupItem, PersistedRecord};

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENT BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable key-value storage provided by the host.
///
/// Implementations might use:
/// - In-memory storage (for testing)
/// - A JSON snapshot file (single-process tools)
/// - The editor's global state store
#[async_trait]
pub trait PersistentBackend: Send + Sync {
    /// Reads a record.
    async fn get(&self, key: &str) -> Result<Option<PersistedRecord>>;

    /// Writes a record, replacing any previous one.
    async fn set(&self, key: &str, record: PersistedRecord) -> Result<()>;

    /// Deletes a record. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists every stored key.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Forces buffered writes to durable storage.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REMOTE FETCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Fetches one kind of remote resource for the prefetch queue.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetches the resource named by `lookup`.
    async fn fetch(&self, lookup: &LookupItem) -> Result<CacheValue>;
}

/// Adapts an async closure into a [`RemoteFetcher`].
pub struct FnFetcher<F>(F);

/// Wraps a closure `Fn(LookupItem) -> impl Future<Output = Result<CacheValue>>`.
pub fn fetcher_fn<F, Fut>(f: F) -> FnFetcher<F>
where
    F: Fn(LookupItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheValue>> + Send + 'static,
{
    FnFetcher(f)
}

#[async_trait]
impl<F, Fut> RemoteFetcher for FnFetcher<F>
where
    F: Fn(LookupItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheValue>> + Send + 'static,
{
    async fn fetch(&self, lookup: &LookupItem) -> Result<CacheValue> {
        (self.0)(lookup.clone()).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current time, epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `start` epoch milliseconds.
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance_millis(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance_millis(secs * 1000);
    }

    /// Sets the clock.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
