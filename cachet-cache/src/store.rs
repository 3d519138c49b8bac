//! In-memory TTL cache with policy-driven persistence.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use cachet_core::error::Result;
use cachet_core::traits::{Clock, PersistentBackend, SystemClock};
use cachet_core::types::{
    class_prefix, CacheRecord, CacheStats, CacheValue, LoadReport,
};

use crate::persist::PersistWriter;
use crate::policy::CachePolicyRegistry;

/// TTL cache keyed by `<class>:<id>` strings.
///
/// Memory is authoritative. Entries whose policy is persistent are mirrored
/// to the backend in the background; backend failures are logged and never
/// reach the caller. Expired entries are evicted lazily by `get`.
///
/// Thread-safe: every check-then-act on the map happens under one lock.
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheRecord>>,
    registry: Arc<CachePolicyRegistry>,
    backend: Option<Arc<dyn PersistentBackend>>,
    writer: Option<PersistWriter>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Creates a memory-only store.
    pub fn new(registry: CachePolicyRegistry) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            registry: Arc::new(registry),
            backend: None,
            writer: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a store that mirrors persistent classes to `backend`.
    ///
    /// Must be called from within a Tokio runtime; the persistence writer is
    /// spawned on it.
    pub fn with_backend(
        registry: CachePolicyRegistry,
        backend: Arc<dyn PersistentBackend>,
    ) -> Result<Self> {
        let registry = Arc::new(registry);
        let writer = PersistWriter::spawn(backend.clone(), registry.clone())?;
        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            registry,
            backend: Some(backend),
            writer: Some(writer),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the policy registry.
    pub fn registry(&self) -> &CachePolicyRegistry {
        &self.registry
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Returns the cached value, or `None` if absent or expired.
    ///
    /// An expired entry is evicted from memory and, if persistent, from the
    /// backend as part of the read.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = self.now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    debug!(key, "Cache miss");
                    return None;
                }
                Some(record) if !record.is_expired(now) => return Some(record.value.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent set may have replaced it.
        let mut entries = self.entries.write();
        let expired = match entries.get(key) {
            Some(record) if !record.is_expired(now) => return Some(record.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
            self.unpersist(key);
            debug!(key, "Cache entry expired, evicting");
        }
        None
    }

    /// Returns the cached value deserialized as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Returns the metadata stored alongside an unexpired entry.
    pub fn get_metadata(&self, key: &str) -> Option<CacheValue> {
        let now = self.now();
        self.entries
            .read()
            .get(key)
            .filter(|record| !record.is_expired(now))
            .and_then(|record| record.metadata.clone())
    }

    /// Returns true if `key` has an unexpired entry.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of entries in memory, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WRITES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Caches a value under the policy resolved for `key`.
    pub fn set(&self, key: &str, value: CacheValue) {
        self.set_with_metadata(key, value, None);
    }

    /// Serializes and caches a value.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Caches a value with caller-supplied metadata.
    ///
    /// Metadata stays in memory; only `{value, expiry}` is persisted.
    pub fn set_with_metadata(&self, key: &str, value: CacheValue, metadata: Option<CacheValue>) {
        let policy = self.registry.resolve(key);
        let record = CacheRecord {
            value,
            expiry: self.now() + policy.ttl_millis(),
            metadata,
        };
        let persisted = policy.persistent.then(|| record.to_persisted());

        {
            let mut entries = self.entries.write();
            entries.insert(key.to_string(), record);
            if let (Some(writer), Some(persisted)) = (&self.writer, persisted) {
                writer.put(policy.storage_key(key), persisted);
            }
        }
        debug!(key, ttl_seconds = policy.ttl_seconds.max(0), "Cached entry");
    }

    /// Removes an entry from memory and, if its policy is persistent, from
    /// the backend.
    pub fn delete(&self, key: &str) {
        let mut entries = self.entries.write();
        entries.remove(key);
        self.unpersist(key);
    }

    /// Removes every entry whose key starts with `prefix`.
    ///
    /// Every persisted record under the prefix is deleted as well, whether
    /// or not it was loaded into memory. Returns the number of memory entries
    /// removed, so an immediate second call returns 0.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|k, _| !k.starts_with(prefix));
            if let Some(writer) = &self.writer {
                writer.delete_prefix(prefix.to_string());
            }
            before - entries.len()
        };

        info!(prefix, removed, "Cleared cache prefix");
        removed
    }

    /// Extends the expiry of every entry whose key starts with `prefix`.
    ///
    /// The policy is resolved once from `prefix` itself, not per entry.
    /// Values are left untouched; entries are re-persisted when that policy
    /// is persistent.
    pub fn refresh_prefix(&self, prefix: &str) {
        let policy = self.registry.resolve(prefix);
        let expiry = self.now() + policy.ttl_millis();

        let writer = self.writer.as_ref().filter(|_| policy.persistent);
        let mut refreshed = 0usize;

        let mut entries = self.entries.write();
        for (key, record) in entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
            record.expiry = expiry;
            if let Some(writer) = writer {
                writer.put(policy.storage_key(key), record.to_persisted());
            }
            refreshed += 1;
        }
        drop(entries);

        debug!(prefix, refreshed, "Refreshed cache prefix");
    }

    /// Removes every entry. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        self.clear_prefix("")
    }

    /// Queues the backend delete for `key`. Called with the entry lock held.
    fn unpersist(&self, key: &str) {
        let policy = self.registry.resolve(key);
        if !policy.persistent {
            return;
        }
        if let Some(writer) = &self.writer {
            writer.delete(policy.storage_key(key));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATS & LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Returns a snapshot of cache contents.
    ///
    /// Expired entries are counted, not evicted.
    pub fn get_stats(&self) -> CacheStats {
        let now = self.now();
        let entries = self.entries.read();

        let mut stats = CacheStats {
            total_size: entries.len(),
            ..Default::default()
        };

        for (key, record) in entries.iter() {
            if record.is_expired(now) {
                stats.expired_entries += 1;
            } else {
                stats.active_entries += 1;
            }
            if self.registry.resolve(key).persistent {
                stats.persistent_entries += 1;
            }
            *stats
                .entries_by_prefix
                .entry(class_prefix(key).to_string())
                .or_insert(0) += 1;
        }

        stats
    }

    /// Restores persisted records at startup.
    ///
    /// Backend keys under a known storage prefix are stripped back to their
    /// cache key. Unexpired records are loaded; expired ones are deleted from
    /// the backend. Never fails: per-entry errors are logged and skipped.
    #[instrument(skip(self))]
    pub async fn load(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let Some(backend) = &self.backend else {
            return report;
        };

        let keys = match backend.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list persisted cache keys");
                return report;
            }
        };

        let now = self.now();
        for storage_key in keys {
            let Some(key) = self.registry.strip_storage_prefix(&storage_key) else {
                report.skipped += 1;
                continue;
            };

            match backend.get(&storage_key).await {
                Ok(Some(record)) if !record.is_expired(now) => {
                    self.entries
                        .write()
                        .entry(key.to_string())
                        .or_insert_with(|| record.into_record());
                    report.loaded += 1;
                }
                Ok(Some(_)) => {
                    if let Err(e) = backend.delete(&storage_key).await {
                        warn!(storage_key = %storage_key, error = %e, "Failed to delete expired persisted entry");
                    }
                    report.expired += 1;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(storage_key = %storage_key, error = %e, "Failed to read persisted cache entry");
                    report.failed += 1;
                }
            }
        }

        info!(
            loaded = report.loaded,
            expired = report.expired,
            failed = report.failed,
            "Loaded persisted cache"
        );
        report
    }

    /// Waits until all queued persistence work has reached the backend.
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    /// Flushes pending persistence and stops the writer.
    ///
    /// The store keeps serving from memory afterwards; later writes are no
    /// longer persisted.
    pub async fn close(&self) {
        if let Some(writer) = &self.writer {
            writer.close().await;
        }
    }
}
