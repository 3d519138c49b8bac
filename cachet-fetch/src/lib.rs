//! # Cachet Fetch
//!
//! Fetch coordination on top of the cache store:
//!
//! - **FetchCoalescer**: at most one remote fetch per key in flight
//! - **PrefetchQueue**: capped, throttled, bounded-concurrency cache warming
//! - **Throttle**: leading + trailing trigger collapsing
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cachet_cache::{CachePolicyRegistry, CacheStore};
//! use cachet_core::traits::fetcher_fn;
//! use cachet_core::types::{LookupItem, LookupType};
//! use cachet_fetch::{FetchCoalescer, PrefetchQueue};
//!
//! let store = Arc::new(CacheStore::new(CachePolicyRegistry::standard()));
//! let coalescer = Arc::new(FetchCoalescer::new(store));
//!
//! let offering = coalescer
//!     .get_or_fetch("offering:c1:o1", |key| api.get_offering(key), false)
//!     .await?;
//!
//! let queue = PrefetchQueue::builder(coalescer.clone())
//!     .fetcher(LookupType::Catalog, fetcher_fn(|item| api.get_catalog(item.value)))
//!     .build();
//! queue.enqueue_lookups([LookupItem::catalog("c2")]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod coalescer;
mod config;
mod prefetch;
mod throttle;

pub use coalescer::FetchCoalescer;
pub use config::PrefetchConfig;
pub use prefetch::{EnqueueReport, PrefetchQueue, PrefetchQueueBuilder, PrefetchStats};
pub use throttle::Throttle;
