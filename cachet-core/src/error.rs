//! Error types for Cachet.
//!
//! This module provides the error hierarchy using `thiserror`.
//! Direct callers see fetch failures; persistence failures are logged by the
//! store and never reach a `get`/`set` caller.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using `CachetError`.
pub type Result<T> = std::result::Result<T, CachetError>;

/// Main error type for all Cachet operations.
#[derive(Debug, Error)]
pub enum CachetError {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Generic configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The same key class was registered twice.
    #[error("Duplicate cache policy for class '{0}'")]
    DuplicatePolicy(String),

    /// The policy table has no DEFAULT entry.
    #[error("Policy table is missing the DEFAULT policy")]
    MissingDefaultPolicy,

    // ═══════════════════════════════════════════════════════════════════════════
    // KEY & LOOKUP ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Malformed cache key.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// A lookup item lacks a context field its type requires.
    #[error("Lookup '{lookup}' is missing required context field '{field}'")]
    MissingContext {
        /// Lookup type name
        lookup: String,
        /// Missing field name
        field: &'static str,
    },

    /// No remote fetcher is registered for a lookup type.
    #[error("No fetcher registered for lookup type '{0}'")]
    FetcherNotRegistered(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // FETCH ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A coalesced fetch failed. Every caller attached to the same fetch
    /// receives this variant sharing one underlying error.
    #[error("Fetch failed for '{key}': {source}")]
    FetchFailed {
        /// Cache key that was being fetched
        key: String,
        /// Underlying failure, shared across all attached callers
        #[source]
        source: Arc<CachetError>,
    },

    /// The remote service reported an error.
    #[error("Remote request failed: {0}")]
    Remote(String),

    /// The remote request timed out.
    #[error("Remote request timed out after {millis}ms")]
    Timeout {
        /// Elapsed time before giving up
        millis: u64,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // PERSISTENCE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Durable backend read/write failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Stored snapshot is unreadable.
    #[error("Storage corrupted: {0}")]
    StorageCorrupted(String),

    /// Snapshot format version mismatch.
    #[error("Storage version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this build writes
        expected: u8,
        /// Version found on disk
        actual: u8,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION & I/O
    // ═══════════════════════════════════════════════════════════════════════════

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CachetError {
    /// Returns true if this error is worth retrying.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CachetError::Remote(_) | CachetError::Timeout { .. } => true,
            CachetError::FetchFailed { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Returns true if this error came from the durable backend.
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            CachetError::PersistenceError(_)
                | CachetError::StorageCorrupted(_)
                | CachetError::VersionMismatch { .. }
                | CachetError::IoError(_)
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CachetError::ConfigError(_)
                | CachetError::DuplicatePolicy(_)
                | CachetError::MissingDefaultPolicy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CachetError::MissingContext {
            lookup: "flavors".into(),
            field: "catalog_id",
        };
        assert!(err.to_string().contains("flavors"));
        assert!(err.to_string().contains("catalog_id"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CachetError::Remote("503".into()).is_recoverable());
        assert!(CachetError::Timeout { millis: 10 }.is_recoverable());
        assert!(!CachetError::MissingDefaultPolicy.is_recoverable());

        assert!(CachetError::PersistenceError("disk".into()).is_persistence_error());
        assert!(!CachetError::Remote("x".into()).is_persistence_error());

        assert!(CachetError::DuplicatePolicy("offering".into()).is_config_error());
        assert!(CachetError::MissingDefaultPolicy.is_config_error());
    }

    #[test]
    fn test_fetch_failed_shares_source() {
        let source = Arc::new(CachetError::Remote("boom".into()));
        let a = CachetError::FetchFailed { key: "catalog:c1".into(), source: source.clone() };
        let b = CachetError::FetchFailed { key: "catalog:c1".into(), source: source.clone() };

        assert_eq!(Arc::strong_count(&source), 3);
        assert_eq!(a.to_string(), b.to_string());
        assert!(a.is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid");
        let result: Result<serde_json::Value> = json_result.map_err(CachetError::from);
        assert!(matches!(result, Err(CachetError::JsonError(_))));
    }
}
