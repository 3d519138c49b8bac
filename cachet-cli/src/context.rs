//! Application context: the one place cache components are constructed.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use cachet_cache::{CachePolicyRegistry, CacheStore};
use cachet_core::types::PolicyTable;
use cachet_fetch::FetchCoalescer;
use cachet_storage::FileBackend;

/// Owns the store and the coalescer in front of it.
pub struct AppContext {
    pub store: Arc<CacheStore>,
    pub coalescer: Arc<FetchCoalescer>,
    backend: Option<Arc<FileBackend>>,
}

impl AppContext {
    /// Builds the context. With a store path, persisted records are loaded
    /// before the context is returned.
    pub async fn open(store_path: Option<&Path>, policies_path: Option<&Path>) -> Result<Self> {
        let registry = load_policies(policies_path)?;

        let (store, backend) = match store_path {
            Some(path) => {
                let backend = Arc::new(
                    FileBackend::open(path)
                        .await
                        .with_context(|| format!("Failed to open cache file {}", path.display()))?,
                );
                let store = CacheStore::with_backend(registry, backend.clone())
                    .context("Failed to start persistence writer")?;
                (store, Some(backend))
            }
            None => (CacheStore::new(registry), None),
        };

        let store = Arc::new(store);
        if backend.is_some() {
            let report = store.load().await;
            info!(loaded = report.loaded, expired = report.expired, "Cache restored");
        }

        Ok(Self {
            coalescer: Arc::new(FetchCoalescer::new(store.clone())),
            store,
            backend,
        })
    }

    /// Returns true if the store is backed by a file.
    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    /// Drains pending persistence and saves the cache file.
    pub async fn shutdown(&self) -> Result<()> {
        self.store.close().await;
        if let Some(backend) = &self.backend {
            backend.save().await.context("Failed to save cache file")?;
        }
        Ok(())
    }
}

/// Reads a JSON policy table, or returns the built-in policies.
pub fn load_policies(path: Option<&Path>) -> Result<CachePolicyRegistry> {
    let Some(path) = path else {
        return Ok(CachePolicyRegistry::standard());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    let table: PolicyTable = serde_json::from_str(&raw).context("Invalid policy file")?;
    CachePolicyRegistry::from_table(&table).context("Invalid policy table")
}
