//! Cache policy types.

use serde::{Deserialize, Serialize};

/// Per-class caching policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Time-to-live in seconds. Negative values are treated as 0.
    pub ttl_seconds: i64,
    /// Whether writes are mirrored to the durable backend
    #[serde(default)]
    pub persistent: bool,
    /// Prefix prepended to the cache key in the backend
    #[serde(default)]
    pub storage_prefix: String,
}

impl CachePolicy {
    /// Creates an in-memory-only policy.
    pub fn memory(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            persistent: false,
            storage_prefix: String::new(),
        }
    }

    /// Creates a policy whose records are persisted under `storage_prefix`.
    pub fn persistent(ttl_seconds: i64, storage_prefix: impl Into<String>) -> Self {
        Self {
            ttl_seconds,
            persistent: true,
            storage_prefix: storage_prefix.into(),
        }
    }

    /// TTL in milliseconds, clamped to be non-negative.
    pub fn ttl_millis(&self) -> i64 {
        self.ttl_seconds.max(0).saturating_mul(1000)
    }

    /// Returns the backend key for a cache key under this policy.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.storage_prefix, key)
    }
}

/// One row of a serialized policy table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Class name (`"default"` for the fallback)
    pub class: String,
    /// Policy for that class
    #[serde(flatten)]
    pub policy: CachePolicy,
}

/// A policy table as read from configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Policy rows
    pub policies: Vec<PolicyEntry>,
}
