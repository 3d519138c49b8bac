//! Simulated remote services for the `demo` command.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use cachet_core::error::{CachetError, Result};
use cachet_core::traits::RemoteFetcher;
use cachet_core::types::{CacheValue, LookupItem, LookupType};

/// A slow, occasionally failing stand-in for the catalog API.
pub struct SimulatedApi {
    latency: Duration,
    offerings_per_catalog: usize,
    /// Every n-th call fails; 0 disables failures
    fail_every: usize,
    calls: AtomicUsize,
}

impl SimulatedApi {
    pub fn new(latency: Duration, offerings_per_catalog: usize, fail_every: usize) -> Self {
        Self {
            latency,
            offerings_per_catalog,
            fail_every,
            calls: AtomicUsize::new(0),
        }
    }

    /// Remote calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Serves a single offering by cache key.
    pub async fn offering(&self, key: &str) -> Result<CacheValue> {
        self.round_trip().await?;
        Ok(json!({ "key": key, "label": "Demo offering" }))
    }

    async fn round_trip(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(CachetError::Remote(format!("simulated 503 on call {}", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFetcher for SimulatedApi {
    async fn fetch(&self, lookup: &LookupItem) -> Result<CacheValue> {
        self.round_trip().await?;
        let value = match lookup.lookup_type {
            LookupType::Catalog => json!({ "id": lookup.value, "label": format!("Catalog {}", lookup.value) }),
            LookupType::Offerings => {
                let resources: Vec<_> = (0..self.offerings_per_catalog)
                    .map(|i| json!({ "id": format!("{}-o{}", lookup.value, i) }))
                    .collect();
                json!({ "resource_count": resources.len(), "resources": resources })
            }
            LookupType::Flavors => json!([
                { "name": "standard", "offering": lookup.value },
                { "name": "hardened", "offering": lookup.value },
            ]),
        };
        Ok(value)
    }
}
