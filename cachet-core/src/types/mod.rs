//! Domain types for Cachet.
//!
//! - [`KeyClass`]: closed set of cache key classes
//! - [`CachePolicy`]: TTL and persistence rules per class
//! - [`CacheRecord`] / [`PersistedRecord`]: in-memory and durable records
//! - [`LookupItem`]: a prefetch candidate

pub mod key;
mod lookup;
mod policy;
mod record;

pub use key::{class_prefix, KeyClass};
pub use lookup::*;
pub use policy::*;
pub use record::*;
