//! In-memory persistent backend.
//!
//! Fast, thread-safe storage for tests and for hosts that only need records
//! to outlive a single `CacheStore`, not the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use cachet_core::error::{CachetError, Result};
use cachet_core::traits::PersistentBackend;
use cachet_core::types::PersistedRecord;

/// In-memory backend.
///
/// Uses a concurrent map for thread-safe access without external
/// synchronization. Writes can be made to fail on demand to exercise the
/// store's degraded-persistence path.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Storage key → record
    records: DashMap<String, PersistedRecord>,
    /// When set, `set` and `delete` fail
    fail_writes: AtomicBool,
    /// Successful writes (sets and deletes)
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns true if a record exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of every record (for snapshots).
    pub fn snapshot(&self) -> Vec<(String, PersistedRecord)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Replaces the contents with `records`.
    pub fn restore(&self, records: Vec<(String, PersistedRecord)>) -> usize {
        self.records.clear();
        let count = records.len();
        for (key, record) in records {
            self.records.insert(key, record);
        }
        count
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CachetError::PersistenceError(format!(
                "write rejected for '{}'",
                key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<PersistedRecord>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self, record))]
    async fn set(&self, key: &str, record: PersistedRecord) -> Result<()> {
        self.check_writable(key)?;
        self.records.insert(key.to_string(), record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(key, "Stored record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.records.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.records.iter().map(|entry| entry.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(expiry: i64) -> PersistedRecord {
        PersistedRecord { value: json!({"name": "x"}), expiry }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::new();
        backend.set("off_offering:c1:o1", record(10)).await.unwrap();

        assert_eq!(backend.get("off_offering:c1:o1").await.unwrap(), Some(record(10)));
        assert_eq!(backend.len(), 1);

        backend.delete("off_offering:c1:o1").await.unwrap();
        assert!(backend.get("off_offering:c1:o1").await.unwrap().is_none());
        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let backend = MemoryBackend::new();
        assert!(backend.delete("nothing").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_keys() {
        let backend = MemoryBackend::new();
        backend.set("a", record(1)).await.unwrap();
        backend.set("b", record(2)).await.unwrap();

        let mut keys = backend.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let backend = MemoryBackend::new();
        backend.set_fail_writes(true);

        let err = backend.set("a", record(1)).await.unwrap_err();
        assert!(err.is_persistence_error());
        assert!(backend.is_empty());

        backend.set_fail_writes(false);
        backend.set("a", record(1)).await.unwrap();
        assert!(backend.contains("a"));
    }

    #[test]
    fn test_snapshot_restore() {
        let backend = MemoryBackend::new();
        let restored = backend.restore(vec![("k".into(), record(5))]);
        assert_eq!(restored, 1);
        assert_eq!(backend.snapshot(), vec![("k".to_string(), record(5))]);
    }
}
