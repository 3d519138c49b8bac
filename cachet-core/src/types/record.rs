//! Cache records and statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque cache payload.
pub type CacheValue = serde_json::Value;

/// An in-memory cache record.
///
/// Owned by the store; callers only ever see clones of `value`.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRecord {
    /// Cached payload
    pub value: CacheValue,
    /// Absolute expiry, epoch milliseconds
    pub expiry: i64,
    /// Caller-supplied metadata (never persisted)
    pub metadata: Option<CacheValue>,
}

impl CacheRecord {
    /// Returns true once `now` has reached the expiry.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }

    /// Returns the durable form of this record.
    pub fn to_persisted(&self) -> PersistedRecord {
        PersistedRecord {
            value: self.value.clone(),
            expiry: self.expiry,
        }
    }
}

/// The self-describing form written to the durable backend.
///
/// Carries only the payload and its expiry, so reloading it needs no policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Cached payload
    pub value: CacheValue,
    /// Absolute expiry, epoch milliseconds
    pub expiry: i64,
}

impl PersistedRecord {
    /// Returns true once `now` has reached the expiry.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }

    /// Converts into an in-memory record without metadata.
    pub fn into_record(self) -> CacheRecord {
        CacheRecord {
            value: self.value,
            expiry: self.expiry,
            metadata: None,
        }
    }
}

/// Snapshot of cache contents, computed by scanning memory at call time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries held in memory, expired ones included
    pub total_size: usize,
    /// Entries not yet expired
    pub active_entries: usize,
    /// Entries past their expiry but not yet evicted
    pub expired_entries: usize,
    /// Entries whose policy mirrors them to the backend
    pub persistent_entries: usize,
    /// Entry count per class prefix
    pub entries_by_prefix: BTreeMap<String, usize>,
}

/// Outcome of loading persisted records at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Records restored into memory
    pub loaded: usize,
    /// Expired records removed from the backend
    pub expired: usize,
    /// Backend keys that matched no known storage prefix
    pub skipped: usize,
    /// Records that could not be read
    pub failed: usize,
}
