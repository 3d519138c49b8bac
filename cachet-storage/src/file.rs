//! File-backed persistent backend.
//!
//! Keeps records in memory and snapshots them to a single file. Suitable for
//! single-process tools where the cache should survive a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use cachet_core::error::{CachetError, Result};
use cachet_core::traits::PersistentBackend;
use cachet_core::types::PersistedRecord;

use crate::MemoryBackend;

/// File-based backend.
///
/// # File Format
///
/// ```text
/// magic (4 bytes): "CCHE"
/// version (1 byte): 1
/// count (8 bytes): number of records, little endian
/// records (variable): JSON object, storage key → {value, expiry}
/// ```
pub struct FileBackend {
    /// Path to the snapshot file
    path: PathBuf,
    /// In-memory records
    memory: MemoryBackend,
    /// Whether there are unsaved changes
    dirty: AtomicBool,
    /// Save after this many writes
    auto_save_threshold: u64,
    /// Writes since last save
    writes_since_save: AtomicU64,
    /// Serializes saves so snapshots never interleave
    save_lock: Mutex<()>,
}

/// File format magic bytes
const MAGIC: &[u8; 4] = b"CCHE";
/// Current file format version
const VERSION: u8 = 1;
/// Header length: magic + version + count
const HEADER_LEN: usize = 13;

impl FileBackend {
    /// Opens the backend at `path`, loading the file if it exists.
    ///
    /// The file is created on first save.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = Self {
            path: path.as_ref().to_path_buf(),
            memory: MemoryBackend::new(),
            dirty: AtomicBool::new(false),
            auto_save_threshold: 50,
            writes_since_save: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        };

        if backend.path.exists() {
            backend.load().await?;
        }

        Ok(backend)
    }

    /// Opens the backend with a custom auto-save threshold.
    pub async fn with_auto_save(path: impl AsRef<Path>, threshold: u64) -> Result<Self> {
        let mut backend = Self::open(path).await?;
        backend.auto_save_threshold = threshold;
        Ok(backend)
    }

    #[instrument(skip(self))]
    async fn load(&self) -> Result<()> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;

        if contents.len() < HEADER_LEN {
            return Err(CachetError::StorageCorrupted("file too short".into()));
        }
        if &contents[0..4] != MAGIC {
            return Err(CachetError::StorageCorrupted("invalid magic bytes".into()));
        }
        let version = contents[4];
        if version != VERSION {
            return Err(CachetError::VersionMismatch {
                expected: VERSION,
                actual: version,
            });
        }

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&contents[5..HEADER_LEN]);
        let count = u64::from_le_bytes(count_bytes);

        let records: BTreeMap<String, PersistedRecord> = if contents.len() > HEADER_LEN {
            serde_json::from_slice(&contents[HEADER_LEN..])
                .map_err(|e| CachetError::StorageCorrupted(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        if records.len() as u64 != count {
            warn!(expected = count, actual = records.len(), "Record count mismatch in cache file");
        }

        let loaded = self.memory.restore(records.into_iter().collect());
        self.dirty.store(false, Ordering::SeqCst);
        info!(loaded, path = ?self.path, "Loaded cache file");
        Ok(())
    }

    /// Writes all records to the file.
    #[instrument(skip(self))]
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let records: BTreeMap<String, PersistedRecord> =
            self.memory.snapshot().into_iter().collect();
        let count = records.len() as u64;
        let serialized = serde_json::to_vec(&records)?;

        let mut contents = Vec::with_capacity(HEADER_LEN + serialized.len());
        contents.extend_from_slice(MAGIC);
        contents.push(VERSION);
        contents.extend_from_slice(&count.to_le_bytes());
        contents.extend_from_slice(&serialized);

        // Write to a temp file, then rename over the target
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.path).await?;

        self.dirty.store(false, Ordering::SeqCst);
        self.writes_since_save.store(0, Ordering::SeqCst);
        debug!(count, "Cache file saved");
        Ok(())
    }

    /// Checks if there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    async fn record_write(&self) -> Result<()> {
        self.dirty.store(true, Ordering::SeqCst);
        let writes = self.writes_since_save.fetch_add(1, Ordering::SeqCst) + 1;
        if writes >= self.auto_save_threshold {
            self.save().await?;
        }
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if self.is_dirty() {
            warn!(path = ?self.path, "FileBackend dropped with unsaved changes");
        }
    }
}

#[async_trait]
impl PersistentBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<PersistedRecord>> {
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, record: PersistedRecord) -> Result<()> {
        self.memory.set(key, record).await?;
        self.record_write().await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.memory.delete(key).await?;
        self.record_write().await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.memory.list_keys().await
    }

    async fn flush(&self) -> Result<()> {
        if self.is_dirty() {
            self.save().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(expiry: i64) -> PersistedRecord {
        PersistedRecord { value: json!({"name": "x"}), expiry }
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let backend = FileBackend::open(&path).await.unwrap();
        assert!(backend.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        {
            let backend = FileBackend::open(&path).await.unwrap();
            backend.set("off_offering:c1:o1", record(100)).await.unwrap();
            backend.set("cat_catalog:c1", record(200)).await.unwrap();
            backend.save().await.unwrap();
        }

        let backend = FileBackend::open(&path).await.unwrap();
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.get("off_offering:c1:o1").await.unwrap(), Some(record(100)));
    }

    #[tokio::test]
    async fn test_dirty_tracking_and_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let backend = FileBackend::open(&path).await.unwrap();
        assert!(!backend.is_dirty());

        backend.set("a", record(1)).await.unwrap();
        assert!(backend.is_dirty());

        backend.flush().await.unwrap();
        assert!(!backend.is_dirty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_auto_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let backend = FileBackend::with_auto_save(&path, 2).await.unwrap();
        backend.set("a", record(1)).await.unwrap();
        assert!(!path.exists());

        backend.set("b", record(2)).await.unwrap();
        assert!(path.exists());
        assert!(!backend.is_dirty());

        let reopened = FileBackend::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.set("a", record(1)).await.unwrap();
        backend.delete("a").await.unwrap();
        backend.flush().await.unwrap();

        let reopened = FileBackend::open(&path).await.unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        fs::write(&path, b"invalid data").await.unwrap();

        let result = FileBackend::open(&path).await;
        assert!(matches!(result, Err(CachetError::StorageCorrupted(_))));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let mut contents = Vec::new();
        contents.extend_from_slice(MAGIC);
        contents.push(VERSION + 1);
        contents.extend_from_slice(&0u64.to_le_bytes());
        fs::write(&path, contents).await.unwrap();

        let result = FileBackend::open(&path).await;
        assert!(matches!(result, Err(CachetError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_atomic_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let temp_path = path.with_extension("tmp");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.set("a", record(1)).await.unwrap();
        backend.save().await.unwrap();

        assert!(!temp_path.exists());
        assert!(path.exists());
    }
}
