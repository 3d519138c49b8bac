//! Background persistence writer.
//!
//! The store never awaits the backend on its hot path. Writes are queued on
//! an unbounded channel and applied by a single task in submission order, so
//! a `set` followed by a `delete` of the same key cannot land reversed.
//! Callers enqueue while still holding the entry lock, so the queue order
//! matches the order of memory mutations.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cachet_core::error::{CachetError, Result};
use cachet_core::traits::PersistentBackend;
use cachet_core::types::PersistedRecord;

use crate::policy::CachePolicyRegistry;

/// A queued backend operation.
#[derive(Debug)]
enum PersistOp {
    Put { storage_key: String, record: PersistedRecord },
    Delete { storage_key: String },
    /// Deletes every persisted record whose cache key starts with the prefix
    DeletePrefix { prefix: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task.
pub(crate) struct PersistWriter {
    tx: Mutex<Option<mpsc::UnboundedSender<PersistOp>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PersistWriter {
    /// Spawns the writer on the current Tokio runtime.
    pub(crate) fn spawn(
        backend: Arc<dyn PersistentBackend>,
        registry: Arc<CachePolicyRegistry>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CachetError::InternalError(format!("persistent cache requires a Tokio runtime: {}", e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = runtime.spawn(run(backend, registry, rx));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a write. Never blocks.
    pub(crate) fn put(&self, storage_key: String, record: PersistedRecord) {
        self.send(PersistOp::Put { storage_key, record });
    }

    /// Queues a delete. Never blocks.
    pub(crate) fn delete(&self, storage_key: String) {
        self.send(PersistOp::Delete { storage_key });
    }

    /// Queues a delete of every persisted key under a cache key prefix,
    /// including records never loaded into memory. Never blocks.
    pub(crate) fn delete_prefix(&self, prefix: String) {
        self.send(PersistOp::DeletePrefix { prefix });
    }

    /// Waits until every operation queued so far has been applied.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.send(PersistOp::Flush(done_tx)) {
            return;
        }
        // The writer only drops the sender if it exits, which means nothing is left to wait for.
        let _ = done_rx.await;
    }

    /// Applies queued operations, then stops the writer.
    pub(crate) async fn close(&self) {
        let tx = self.tx.lock().take();
        drop(tx);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Persistence writer ended abnormally");
            }
        }
    }

    fn send(&self, op: PersistOp) -> bool {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(op).is_err() {
                    warn!("Persistence writer is gone; dropping operation");
                    return false;
                }
                true
            }
            None => {
                warn!("Cache store is closed; dropping persistence operation");
                false
            }
        }
    }
}

async fn run(
    backend: Arc<dyn PersistentBackend>,
    registry: Arc<CachePolicyRegistry>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Put { storage_key, record } => {
                if let Err(e) = backend.set(&storage_key, record).await {
                    warn!(storage_key = %storage_key, error = %e, "Failed to persist cache entry");
                }
            }
            PersistOp::Delete { storage_key } => {
                if let Err(e) = backend.delete(&storage_key).await {
                    warn!(storage_key = %storage_key, error = %e, "Failed to delete persisted cache entry");
                }
            }
            PersistOp::DeletePrefix { prefix } => {
                delete_prefix(backend.as_ref(), &registry, &prefix).await;
            }
            PersistOp::Flush(done) => {
                if let Err(e) = backend.flush().await {
                    warn!(error = %e, "Failed to flush persistent backend");
                }
                let _ = done.send(());
            }
        }
    }
    debug!("Persistence writer stopped");
}

async fn delete_prefix(backend: &dyn PersistentBackend, registry: &CachePolicyRegistry, prefix: &str) {
    let keys = match backend.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(prefix, error = %e, "Failed to list persisted keys for prefix delete");
            return;
        }
    };

    let mut deleted = 0usize;
    for storage_key in keys {
        let matches = registry
            .strip_storage_prefix(&storage_key)
            .is_some_and(|key| key.starts_with(prefix));
        if !matches {
            continue;
        }
        match backend.delete(&storage_key).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(storage_key = %storage_key, error = %e, "Failed to delete persisted cache entry"),
        }
    }
    debug!(prefix, deleted, "Deleted persisted prefix");
}
