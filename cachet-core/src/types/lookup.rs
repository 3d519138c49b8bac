//! Prefetch lookup items.
//!
//! A lookup names one remote resource the prefetch queue may warm. Its
//! canonical cache key is derived exactly as direct readers derive it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CachetError, Result};
use crate::types::key::{catalog_key, flavors_key, offerings_key};

/// Kind of remote resource a lookup targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupType {
    /// Catalog listing; `value` is the catalog id
    Catalog,
    /// Offering list of a catalog; `value` is the catalog id
    Offerings,
    /// Flavors of an offering; `value` is the offering id,
    /// `context.catalog_id` is required
    Flavors,
}

impl LookupType {
    /// Returns the lowercase name of this lookup type.
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupType::Catalog => "catalog",
            LookupType::Offerings => "offerings",
            LookupType::Flavors => "flavors",
        }
    }
}

impl fmt::Display for LookupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific fields a fetcher may need.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupContext {
    /// Owning catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    /// Owning offering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offering_id: Option<String>,
    /// Whether the catalog is public
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

/// A candidate for speculative fetching.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupItem {
    /// Resource kind
    #[serde(rename = "type")]
    pub lookup_type: LookupType,
    /// Primary id of the resource
    pub value: String,
    /// Extra fields for the fetcher
    #[serde(default)]
    pub context: LookupContext,
}

impl LookupItem {
    /// Creates a catalog lookup.
    pub fn catalog(catalog_id: impl Into<String>) -> Self {
        Self {
            lookup_type: LookupType::Catalog,
            value: catalog_id.into(),
            context: LookupContext::default(),
        }
    }

    /// Creates an offering-list lookup.
    pub fn offerings(catalog_id: impl Into<String>) -> Self {
        let catalog_id = catalog_id.into();
        Self {
            lookup_type: LookupType::Offerings,
            value: catalog_id.clone(),
            context: LookupContext {
                catalog_id: Some(catalog_id),
                ..Default::default()
            },
        }
    }

    /// Creates a flavors lookup for an offering in a catalog.
    pub fn flavors(catalog_id: impl Into<String>, offering_id: impl Into<String>) -> Self {
        let offering_id = offering_id.into();
        Self {
            lookup_type: LookupType::Flavors,
            value: offering_id.clone(),
            context: LookupContext {
                catalog_id: Some(catalog_id.into()),
                offering_id: Some(offering_id),
                is_public: None,
            },
        }
    }

    /// Sets the public flag.
    pub fn public(mut self, is_public: bool) -> Self {
        self.context.is_public = Some(is_public);
        self
    }

    /// Returns the canonical cache key, or `None` when a required context
    /// field is missing.
    pub fn cache_key(&self) -> Option<String> {
        match self.lookup_type {
            LookupType::Catalog => Some(catalog_key(&self.value)),
            LookupType::Offerings => Some(offerings_key(&self.value)),
            LookupType::Flavors => self
                .context
                .catalog_id
                .as_deref()
                .map(|catalog_id| flavors_key(catalog_id, &self.value)),
        }
    }

    /// Checks that the context carries every field this type requires.
    pub fn validate(&self) -> Result<()> {
        if self.value.trim().is_empty() {
            return Err(CachetError::MissingContext {
                lookup: self.lookup_type.to_string(),
                field: "value",
            });
        }
        if self.lookup_type == LookupType::Flavors {
            self.require_catalog_id()?;
        }
        Ok(())
    }

    /// Returns the catalog id from context, or an error naming the field.
    pub fn require_catalog_id(&self) -> Result<&str> {
        self.context
            .catalog_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CachetError::MissingContext {
                lookup: self.lookup_type.to_string(),
                field: "catalog_id",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys_match_direct_keys() {
        assert_eq!(LookupItem::catalog("c1").cache_key().unwrap(), catalog_key("c1"));
        assert_eq!(LookupItem::offerings("c1").cache_key().unwrap(), offerings_key("c1"));
        assert_eq!(
            LookupItem::flavors("c1", "o1").cache_key().unwrap(),
            flavors_key("c1", "o1")
        );
    }

    #[test]
    fn test_flavors_without_catalog_has_no_key() {
        let item = LookupItem {
            lookup_type: LookupType::Flavors,
            value: "o1".into(),
            context: LookupContext::default(),
        };
        assert!(item.cache_key().is_none());
        assert!(matches!(
            item.validate(),
            Err(CachetError::MissingContext { field: "catalog_id", .. })
        ));
    }

    #[test]
    fn test_empty_value_rejected() {
        assert!(LookupItem::catalog("  ").validate().is_err());
        assert!(LookupItem::catalog("c1").validate().is_ok());
    }

    #[test]
    fn test_serde_shape() {
        let item = LookupItem::flavors("c1", "o1").public(true);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "flavors");
        assert_eq!(json["context"]["catalog_id"], "c1");
        assert_eq!(json["context"]["is_public"], true);

        let back: LookupItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
