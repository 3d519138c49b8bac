//! Constants for Cachet.
//!
//! Built-in cache policies and prefetch tuning defaults. Hosts may override
//! any of these through configuration; the values here are what the standard
//! policy table and `PrefetchConfig::default()` use.

// ═══════════════════════════════════════════════════════════════════════════════
// KEY FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

/// Separator between the class prefix and the id segments of a cache key.
pub const KEY_SEPARATOR: char = ':';

/// Name used for the fallback policy in policy tables.
pub const DEFAULT_CLASS_NAME: &str = "default";

// ═══════════════════════════════════════════════════════════════════════════════
// TIME-TO-LIVE (seconds)
// ═══════════════════════════════════════════════════════════════════════════════

/// TTL for keys without a dedicated policy.
pub const DEFAULT_TTL_SECONDS: i64 = 3600;

/// TTL for catalog listings.
pub const CATALOG_TTL_SECONDS: i64 = 3600;

/// TTL for per-catalog offering lists and individual offerings.
pub const OFFERING_TTL_SECONDS: i64 = 1800;

/// TTL for flavor lists of an offering.
pub const FLAVOR_TTL_SECONDS: i64 = 1800;

/// TTL for release listings. Releases move quickly, so they stay short-lived
/// and in memory only.
pub const RELEASE_TTL_SECONDS: i64 = 900;

/// TTL for downloaded release tarball metadata.
pub const TARBALL_TTL_SECONDS: i64 = 86_400;

// ═══════════════════════════════════════════════════════════════════════════════
// STORAGE PREFIXES
// ═══════════════════════════════════════════════════════════════════════════════
// Persisted records live under `<storage prefix><cache key>` in the backend.
// Prefixes must be distinct so `load()` can strip them unambiguously.

/// Storage prefix for catalog records.
pub const CATALOG_STORAGE_PREFIX: &str = "cat_";

/// Storage prefix for offering-list records.
pub const OFFERINGS_STORAGE_PREFIX: &str = "offs_";

/// Storage prefix for single-offering records.
pub const OFFERING_STORAGE_PREFIX: &str = "off_";

/// Storage prefix for flavor records.
pub const FLAVOR_STORAGE_PREFIX: &str = "flv_";

/// Storage prefix for tarball records.
pub const TARBALL_STORAGE_PREFIX: &str = "tgz_";

// ═══════════════════════════════════════════════════════════════════════════════
// PREFETCH TUNING
// ═══════════════════════════════════════════════════════════════════════════════

/// Items processed in parallel per drain pass.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 3;

/// Total attempts per prefetch item (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Fixed delay between prefetch attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Throttle window for queue processing triggers, in milliseconds.
pub const DEFAULT_THROTTLE_WINDOW_MS: u64 = 250;

/// Admission cap for catalog lookups per enqueue call.
pub const MAX_CATALOG_LOOKUPS: usize = 10;

/// Admission cap for offering-list lookups per enqueue call.
pub const MAX_OFFERINGS_LOOKUPS: usize = 20;

/// Admission cap for flavor lookups per enqueue call.
pub const MAX_FLAVORS_LOOKUPS: usize = 50;

/// Admission cap for lookup types without a configured cap.
pub const DEFAULT_MAX_LOOKUPS: usize = 25;
