//! Cache key convention.
//!
//! Keys look like `<class>:<id>[:<subid>...]`. The class prefix decides which
//! policy applies. Every producer (direct reads and prefetch) must build keys
//! through these helpers so the same resource always maps to the same key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CLASS_NAME, KEY_SEPARATOR};
use crate::error::{CachetError, Result};

/// Known key classes.
///
/// `Default` is not a real key prefix; it names the fallback policy used for
/// any class that has no entry of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    /// Fallback policy
    Default,
    /// A catalog listing: `catalog:<catalog_id>`
    Catalog,
    /// Offerings of a catalog: `offerings:<catalog_id>`
    Offerings,
    /// A single offering: `offering:<catalog_id>:<offering_id>`
    Offering,
    /// Flavors of an offering: `flavors:<catalog_id>:<offering_id>`
    Flavors,
    /// Releases of a repository: `release:<owner>:<repo>`
    Release,
    /// Release tarball metadata: `tarball:<owner>:<repo>:<tag>`
    Tarball,
}

impl KeyClass {
    /// All classes, `Default` first.
    pub const ALL: [KeyClass; 7] = [
        KeyClass::Default,
        KeyClass::Catalog,
        KeyClass::Offerings,
        KeyClass::Offering,
        KeyClass::Flavors,
        KeyClass::Release,
        KeyClass::Tarball,
    ];

    /// Returns the key prefix for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Default => DEFAULT_CLASS_NAME,
            KeyClass::Catalog => "catalog",
            KeyClass::Offerings => "offerings",
            KeyClass::Offering => "offering",
            KeyClass::Flavors => "flavors",
            KeyClass::Release => "release",
            KeyClass::Tarball => "tarball",
        }
    }

    /// Maps a key prefix to a known class.
    ///
    /// Returns `None` for unknown prefixes and for `"default"`, which is not
    /// a valid key prefix.
    pub fn from_prefix(prefix: &str) -> Option<KeyClass> {
        match prefix {
            "catalog" => Some(KeyClass::Catalog),
            "offerings" => Some(KeyClass::Offerings),
            "offering" => Some(KeyClass::Offering),
            "flavors" => Some(KeyClass::Flavors),
            "release" => Some(KeyClass::Release),
            "tarball" => Some(KeyClass::Tarball),
            _ => None,
        }
    }

    /// Builds a key of this class from id segments.
    pub fn key<I, S>(&self, segments: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::from(self.as_str());
        for segment in segments {
            key.push(KEY_SEPARATOR);
            key.push_str(segment.as_ref());
        }
        key
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyClass {
    type Err = CachetError;

    /// Parses a class name as written in policy tables, `"default"` included.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(DEFAULT_CLASS_NAME) {
            return Ok(KeyClass::Default);
        }
        KeyClass::from_prefix(s)
            .ok_or_else(|| CachetError::ConfigError(format!("unknown key class '{}'", s)))
    }
}

/// Returns the class prefix of a key: the text before the first separator,
/// or the whole key when there is none.
pub fn class_prefix(key: &str) -> &str {
    match key.find(KEY_SEPARATOR) {
        Some(idx) => &key[..idx],
        None => key,
    }
}

/// Key for a catalog listing.
pub fn catalog_key(catalog_id: &str) -> String {
    KeyClass::Catalog.key([catalog_id])
}

/// Key for the offering list of a catalog.
pub fn offerings_key(catalog_id: &str) -> String {
    KeyClass::Offerings.key([catalog_id])
}

/// Key for a single offering.
pub fn offering_key(catalog_id: &str, offering_id: &str) -> String {
    KeyClass::Offering.key([catalog_id, offering_id])
}

/// Key for the flavors of an offering.
pub fn flavors_key(catalog_id: &str, offering_id: &str) -> String {
    KeyClass::Flavors.key([catalog_id, offering_id])
}

/// Key for the release list of a repository.
pub fn release_key(owner: &str, repo: &str) -> String {
    KeyClass::Release.key([owner, repo])
}

/// Key for tarball metadata of a tagged release.
pub fn tarball_key(owner: &str, repo: &str, tag: &str) -> String {
    KeyClass::Tarball.key([owner, repo, tag])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("offering:c1:o1", "offering" ; "multi segment")]
    #[test_case("catalog:c1", "catalog" ; "single segment")]
    #[test_case("catalog", "catalog" ; "no separator")]
    #[test_case(":orphan", "" ; "empty class")]
    fn test_class_prefix(key: &str, expected: &str) {
        assert_eq!(class_prefix(key), expected);
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(catalog_key("c1"), "catalog:c1");
        assert_eq!(offerings_key("c1"), "offerings:c1");
        assert_eq!(offering_key("c1", "o1"), "offering:c1:o1");
        assert_eq!(flavors_key("c1", "o1"), "flavors:c1:o1");
        assert_eq!(release_key("acme", "tool"), "release:acme:tool");
        assert_eq!(tarball_key("acme", "tool", "v1.0.0"), "tarball:acme:tool:v1.0.0");
    }

    #[test]
    fn test_from_prefix_roundtrip() {
        for class in KeyClass::ALL.iter().skip(1) {
            assert_eq!(KeyClass::from_prefix(class.as_str()), Some(*class));
        }
        assert_eq!(KeyClass::from_prefix("default"), None);
        assert_eq!(KeyClass::from_prefix("unknown"), None);
    }

    #[test]
    fn test_parse_class_name() {
        assert_eq!("DEFAULT".parse::<KeyClass>().unwrap(), KeyClass::Default);
        assert_eq!("offering".parse::<KeyClass>().unwrap(), KeyClass::Offering);
        assert!("bogus".parse::<KeyClass>().is_err());
    }

    proptest! {
        #[test]
        fn prop_built_keys_resolve_to_their_class(
            idx in 1usize..7,
            segments in proptest::collection::vec("[a-z0-9-]{1,12}", 1..4),
        ) {
            let class = KeyClass::ALL[idx];
            let key = class.key(&segments);
            prop_assert_eq!(class_prefix(&key), class.as_str());
            prop_assert_eq!(KeyClass::from_prefix(class_prefix(&key)), Some(class));
        }
    }
}
