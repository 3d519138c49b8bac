//! Class-prefix to cache-policy resolution.

use std::collections::BTreeMap;

use tracing::debug;

use cachet_core::constants::{
    CATALOG_STORAGE_PREFIX, CATALOG_TTL_SECONDS, DEFAULT_TTL_SECONDS, FLAVOR_STORAGE_PREFIX,
    FLAVOR_TTL_SECONDS, OFFERINGS_STORAGE_PREFIX, OFFERING_STORAGE_PREFIX, OFFERING_TTL_SECONDS,
    RELEASE_TTL_SECONDS, TARBALL_STORAGE_PREFIX, TARBALL_TTL_SECONDS,
};
use cachet_core::error::{CachetError, Result};
use cachet_core::types::{class_prefix, CachePolicy, KeyClass, PolicyTable};

/// Immutable table of cache policies keyed by class.
///
/// Built once at startup through [`PolicyRegistryBuilder`], which rejects
/// duplicate classes and a missing DEFAULT. Resolution never fails: keys of
/// unknown classes get the DEFAULT policy.
#[derive(Clone, Debug)]
pub struct CachePolicyRegistry {
    default: CachePolicy,
    policies: BTreeMap<KeyClass, CachePolicy>,
}

impl CachePolicyRegistry {
    /// Starts an empty registry builder.
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Returns the built-in policy table.
    pub fn standard() -> Self {
        Self {
            default: CachePolicy::memory(DEFAULT_TTL_SECONDS),
            policies: BTreeMap::from([
                (KeyClass::Catalog, CachePolicy::persistent(CATALOG_TTL_SECONDS, CATALOG_STORAGE_PREFIX)),
                (KeyClass::Offerings, CachePolicy::persistent(OFFERING_TTL_SECONDS, OFFERINGS_STORAGE_PREFIX)),
                (KeyClass::Offering, CachePolicy::persistent(OFFERING_TTL_SECONDS, OFFERING_STORAGE_PREFIX)),
                (KeyClass::Flavors, CachePolicy::persistent(FLAVOR_TTL_SECONDS, FLAVOR_STORAGE_PREFIX)),
                (KeyClass::Release, CachePolicy::memory(RELEASE_TTL_SECONDS)),
                (KeyClass::Tarball, CachePolicy::persistent(TARBALL_TTL_SECONDS, TARBALL_STORAGE_PREFIX)),
            ]),
        }
    }

    /// Builds a registry from a deserialized policy table.
    pub fn from_table(table: &PolicyTable) -> Result<Self> {
        let mut builder = Self::builder();
        for entry in &table.policies {
            let class: KeyClass = entry.class.parse()?;
            builder = builder.register(class, entry.policy.clone())?;
        }
        builder.build()
    }

    /// Resolves the policy for a key (or a key prefix).
    pub fn resolve(&self, key: &str) -> &CachePolicy {
        KeyClass::from_prefix(class_prefix(key))
            .and_then(|class| self.policies.get(&class))
            .unwrap_or(&self.default)
    }

    /// Returns the policy registered for a class, DEFAULT included.
    pub fn policy_for(&self, class: KeyClass) -> &CachePolicy {
        match class {
            KeyClass::Default => &self.default,
            other => self.policies.get(&other).unwrap_or(&self.default),
        }
    }

    /// Returns the DEFAULT policy.
    pub fn default_policy(&self) -> &CachePolicy {
        &self.default
    }

    /// Distinct storage prefixes of persistent policies, longest first so a
    /// prefix that extends another is matched before it.
    pub fn storage_prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = std::iter::once(&self.default)
            .chain(self.policies.values())
            .filter(|p| p.persistent && !p.storage_prefix.is_empty())
            .map(|p| p.storage_prefix.as_str())
            .collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        prefixes.dedup();
        prefixes
    }

    /// Splits a backend key into its storage prefix and logical cache key.
    pub fn strip_storage_prefix<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        self.storage_prefixes()
            .into_iter()
            .find_map(|prefix| storage_key.strip_prefix(prefix))
    }
}

impl Default for CachePolicyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Builder that validates a policy table before it is frozen.
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    default: Option<CachePolicy>,
    policies: BTreeMap<KeyClass, CachePolicy>,
}

impl PolicyRegistryBuilder {
    /// Registers the policy for a class.
    ///
    /// Registering a class twice is a configuration error.
    pub fn register(mut self, class: KeyClass, policy: CachePolicy) -> Result<Self> {
        let duplicate = match class {
            KeyClass::Default => self.default.replace(policy).is_some(),
            other => self.policies.insert(other, policy).is_some(),
        };
        if duplicate {
            return Err(CachetError::DuplicatePolicy(class.to_string()));
        }
        Ok(self)
    }

    /// Registers the DEFAULT policy.
    pub fn default_policy(self, policy: CachePolicy) -> Result<Self> {
        self.register(KeyClass::Default, policy)
    }

    /// Freezes the table. Fails if no DEFAULT policy was registered.
    pub fn build(self) -> Result<CachePolicyRegistry> {
        let default = self.default.ok_or(CachetError::MissingDefaultPolicy)?;
        debug!(classes = self.policies.len(), "Policy registry built");
        Ok(CachePolicyRegistry {
            default,
            policies: self.policies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::types::{PolicyEntry, PolicyTable};

    fn offering_registry() -> CachePolicyRegistry {
        CachePolicyRegistry::builder()
            .default_policy(CachePolicy::memory(3600))
            .unwrap()
            .register(KeyClass::Offering, CachePolicy::persistent(1800, "off_"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_known_class() {
        let registry = offering_registry();
        let policy = registry.resolve("offering:c1:o1");
        assert_eq!(policy.ttl_seconds, 1800);
        assert!(policy.persistent);
        assert_eq!(policy.storage_prefix, "off_");
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_default() {
        let registry = offering_registry();
        assert_eq!(registry.resolve("mystery:1"), registry.default_policy());
        assert_eq!(registry.resolve("catalog:c1"), registry.default_policy());
        assert_eq!(registry.resolve(""), registry.default_policy());
    }

    #[test]
    fn test_resolve_bare_prefix() {
        let registry = offering_registry();
        assert_eq!(registry.resolve("offering").storage_prefix, "off_");
    }

    #[test]
    fn test_missing_default_rejected() {
        let result = CachePolicyRegistry::builder()
            .register(KeyClass::Catalog, CachePolicy::memory(10))
            .unwrap()
            .build();
        assert!(matches!(result, Err(CachetError::MissingDefaultPolicy)));
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = CachePolicyRegistry::builder()
            .register(KeyClass::Catalog, CachePolicy::memory(10))
            .unwrap()
            .register(KeyClass::Catalog, CachePolicy::memory(20));
        assert!(matches!(result, Err(CachetError::DuplicatePolicy(c)) if c == "catalog"));

        let result = CachePolicyRegistry::builder()
            .default_policy(CachePolicy::memory(10))
            .unwrap()
            .default_policy(CachePolicy::memory(20));
        assert!(matches!(result, Err(CachetError::DuplicatePolicy(_))));
    }

    #[test]
    fn test_from_table() {
        let table = PolicyTable {
            policies: vec![
                PolicyEntry { class: "default".into(), policy: CachePolicy::memory(3600) },
                PolicyEntry { class: "offering".into(), policy: CachePolicy::persistent(1800, "off_") },
            ],
        };
        let registry = CachePolicyRegistry::from_table(&table).unwrap();
        assert!(registry.resolve("offering:x").persistent);

        let bad = PolicyTable {
            policies: vec![PolicyEntry { class: "nope".into(), policy: CachePolicy::memory(1) }],
        };
        assert!(CachePolicyRegistry::from_table(&bad).unwrap_err().is_config_error());
    }

    #[test]
    fn test_standard_storage_prefixes() {
        let registry = CachePolicyRegistry::standard();
        let prefixes = registry.storage_prefixes();
        assert_eq!(prefixes.len(), 5);
        assert!(!registry.resolve("release:a:b").persistent);

        assert_eq!(registry.strip_storage_prefix("off_offering:c1:o1"), Some("offering:c1:o1"));
        assert_eq!(registry.strip_storage_prefix("offs_offerings:c1"), Some("offerings:c1"));
        assert_eq!(registry.strip_storage_prefix("unrelated"), None);
    }
}
