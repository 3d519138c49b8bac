//! # Cachet Storage
//!
//! Durable backends for the Cachet cache store.
//!
//! - **Memory**: concurrent map, for tests and per-process reuse
//! - **File**: JSON snapshot file with atomic saves, for single-process tools
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cachet_cache::{CachePolicyRegistry, CacheStore};
//! use cachet_storage::FileBackend;
//!
//! let backend = Arc::new(FileBackend::open("cache.bin").await?);
//! let store = CacheStore::with_backend(CachePolicyRegistry::standard(), backend)?;
//! store.load().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

// Re-export the trait from core
pub use cachet_core::traits::PersistentBackend;
