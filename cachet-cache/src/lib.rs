//! # Cachet Cache
//!
//! TTL cache store with class-specific policies and optional durable
//! persistence.
//!
//! ## Example
//!
//! ```rust
//! use cachet_cache::{CachePolicyRegistry, CacheStore};
//! use serde_json::json;
//!
//! let store = CacheStore::new(CachePolicyRegistry::standard());
//! store.set("catalog:c1", json!({"label": "main"}));
//! assert_eq!(store.get("catalog:c1"), Some(json!({"label": "main"})));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod persist;
mod policy;
mod store;

pub use policy::{CachePolicyRegistry, PolicyRegistryBuilder};
pub use store::CacheStore;
