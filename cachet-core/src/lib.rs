//! # Cachet Core
//!
//! Core types, errors, and traits for the Cachet caching layer.
//!
//! This crate provides the foundational building blocks used by all other
//! Cachet crates:
//!
//! - **Types**: cache keys, policies, records, and prefetch lookups
//! - **Errors**: the shared error type
//! - **Constants**: built-in policies and prefetch tuning
//! - **Traits**: the persistent backend and remote fetcher seams
//!
//! ## Example
//!
//! ```rust
//! use cachet_core::types::key::offering_key;
//! use cachet_core::{class_prefix, KeyClass};
//!
//! let key = offering_key("c1", "o1");
//! assert_eq!(key, "offering:c1:o1");
//! assert_eq!(KeyClass::from_prefix(class_prefix(&key)), Some(KeyClass::Offering));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CachetError, Result};
pub use traits::*;
pub use types::*;
