//! Prefetch queue configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cachet_core::constants::{
    DEFAULT_MAX_LOOKUPS, DEFAULT_PREFETCH_CONCURRENCY, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_THROTTLE_WINDOW_MS, MAX_CATALOG_LOOKUPS, MAX_FLAVORS_LOOKUPS,
    MAX_OFFERINGS_LOOKUPS,
};
use cachet_core::types::LookupType;

/// Prefetch queue configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Items processed in parallel per drain pass
    pub concurrency: usize,
    /// Total attempts per item, first try included
    pub retry_attempts: u32,
    /// Fixed delay between attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Throttle window for processing triggers, in milliseconds
    pub throttle_window_ms: u64,
    /// Per-type admission cap for one enqueue call
    pub max_items_per_type: HashMap<LookupType, usize>,
    /// Admission cap for types missing from `max_items_per_type`
    pub default_max_items: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            throttle_window_ms: DEFAULT_THROTTLE_WINDOW_MS,
            max_items_per_type: HashMap::from([
                (LookupType::Catalog, MAX_CATALOG_LOOKUPS),
                (LookupType::Offerings, MAX_OFFERINGS_LOOKUPS),
                (LookupType::Flavors, MAX_FLAVORS_LOOKUPS),
            ]),
            default_max_items: DEFAULT_MAX_LOOKUPS,
        }
    }
}

impl PrefetchConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch concurrency.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the total attempts per item.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the delay between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the throttle window.
    pub fn throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window_ms = window.as_millis() as u64;
        self
    }

    /// Sets the admission cap for one lookup type.
    pub fn max_items(mut self, lookup_type: LookupType, max: usize) -> Self {
        self.max_items_per_type.insert(lookup_type, max);
        self
    }

    /// Returns the admission cap for `lookup_type`.
    pub fn max_items_for(&self, lookup_type: LookupType) -> usize {
        self.max_items_per_type
            .get(&lookup_type)
            .copied()
            .unwrap_or(self.default_max_items)
    }

    /// Concurrency, at least 1.
    pub(crate) fn batch_size(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Attempts, at least 1.
    pub(crate) fn attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    pub(crate) fn retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub(crate) fn throttle_window_duration(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PrefetchConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.max_items_for(LookupType::Offerings), 20);
    }

    #[test]
    fn test_builder() {
        let config = PrefetchConfig::new()
            .concurrency(0)
            .retry_attempts(0)
            .retry_delay(Duration::from_millis(5))
            .max_items(LookupType::Flavors, 2);

        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.attempts(), 1);
        assert_eq!(config.retry_delay_ms, 5);
        assert_eq!(config.max_items_for(LookupType::Flavors), 2);
    }

    #[test]
    fn test_missing_type_uses_default_cap() {
        let mut config = PrefetchConfig::default();
        config.max_items_per_type.clear();
        assert_eq!(config.max_items_for(LookupType::Catalog), DEFAULT_MAX_LOOKUPS);
    }

    #[test]
    fn test_partial_json() {
        let config: PrefetchConfig =
            serde_json::from_str(r#"{ "concurrency": 5, "max_items_per_type": { "offerings": 7 } }"#)
                .unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.max_items_for(LookupType::Offerings), 7);
        assert_eq!(config.max_items_for(LookupType::Catalog), DEFAULT_MAX_LOOKUPS);
    }
}
