#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## How It Works
//!
//! ```text
//!   key ──hash──▶ slot ──▶ bucket (lazily allocated, max_collisions wide)
//!                          ┌─────┬─────┬─────┬─────┐
//!                          │ k,v │ k,v │ k,v │     │   ArcSwapOption cells
//!                          └─────┴─────┴─────┴─────┘
//!   counters (one byte per position, same layout):
//!                          │  12 │   3 │   0 │   0 │   Morris counters
//! ```
//!
//! - **Lookups** scan one bucket without locking and bump the hit entry's
//!   probabilistic counter.
//! - **Misses** load the value and either claim the first free position or,
//!   once the cache holds more than `capacity` entries, evict the position
//!   with the smallest counter. Every counter passed by the eviction scan is
//!   halved, so entries that stop being read age out.
//! - **Buckets stay compact**: occupied positions always form a prefix, so a
//!   scan ends at the first empty position.
//!
//! ## Quick Reference
//!
//! | Operation | Loads on miss | Evicts | Locks |
//! |-----------|---------------|--------|-------|
//! | [`get`](SparseCollisionCache::get) | configured loader | yes | on miss |
//! | [`get_with`](SparseCollisionCache::get_with) | closure | yes | on miss |
//! | [`get_aggressive`](SparseCollisionCache::get_aggressive) | configured loader | yes | only to evict |
//! | [`get_if_present`](SparseCollisionCache::get_if_present) | no | no | never |
//! | [`put_replace`](SparseCollisionCache::put_replace) / [`put_if_absent`](SparseCollisionCache::put_if_absent) | n/a | yes | only to evict |
//! | [`put_if_space_absent`](SparseCollisionCache::put_if_space_absent) / [`put_if_space_replace`](SparseCollisionCache::put_if_space_replace) | n/a | no | never |
//! | [`replace`](SparseCollisionCache::replace) | n/a | no | never |
//! | [`remove`](SparseCollisionCache::remove) | n/a | n/a | always |
//!
//! ## Code Examples
//!
//! ### Loading cache
//!
//! ```rust
//! use collision_cache::SparseCollisionCache;
//! use collision_cache::config::CollisionCacheConfig;
//! use core::num::NonZeroUsize;
//!
//! let config = CollisionCacheConfig::new(NonZeroUsize::new(100).unwrap());
//! let cache = SparseCollisionCache::init(
//!     config,
//!     |id: &u64| Some(format!("user-{id}")),
//!     |_, name: String| name.into_boxed_str(),
//! )
//! .unwrap();
//!
//! assert_eq!(cache.get(&7).as_deref(), Some("user-7"));
//! assert_eq!(cache.len(), 1);
//! ```
//!
//! ### Explicit puts
//!
//! ```rust
//! use collision_cache::CollisionCacheBuilder;
//! use core::num::NonZeroUsize;
//!
//! let cache = CollisionCacheBuilder::new(NonZeroUsize::new(2).unwrap())
//!     .build::<&str, u32>()
//!     .unwrap();
//!
//! assert_eq!(cache.put_if_absent("a", 1), 1);
//! assert_eq!(cache.put_if_absent("a", 2), 1);
//! assert_eq!(cache.put_replace("a", 3), 3);
//! assert_eq!(cache.remove(&"a"), Some(3));
//! assert!(cache.is_empty());
//! ```
//!
//! ## Modules
//!
//! - [`sparse`]: the capacity-bounded cache
//! - [`builder`]: fluent construction
//! - [`config`]: configuration and table sizing
//! - [`counters`]: probabilistic, decayable frequency counters
//! - [`entry`]: the immutable key/value pair stored in buckets
//! - [`error`]: configuration errors
//! - [`metrics`]: event counters and the [`CacheMetrics`] trait

#[cfg(test)]
extern crate scoped_threadpool;

/// Immutable key/value pairs.
pub mod entry;

/// Probabilistic access counters.
///
/// One byte per bucket position, incremented with decreasing probability as
/// the count grows and halved by eviction scans.
pub mod counters;

/// Bucket cells and the lazily populated bucket table.
pub(crate) mod bucket;

/// Hashing, probing, victim selection and compaction shared by the cache.
pub(crate) mod engine;

/// Cache configuration.
pub mod config;

/// Configuration errors.
pub mod error;

/// Cache metrics system.
///
/// Opt-in event counters plus the [`CacheMetrics`](metrics::CacheMetrics)
/// reporting trait.
pub mod metrics;

/// The capacity-bounded collision cache.
pub mod sparse;

/// Fluent builder for [`SparseCollisionCache`].
pub mod builder;

/// Hasher used when none is supplied.
#[cfg(feature = "hashbrown")]
pub use hashbrown::DefaultHashBuilder;

/// Hasher used when none is supplied.
#[cfg(not(feature = "hashbrown"))]
pub use std::collections::hash_map::RandomState as DefaultHashBuilder;

pub use builder::CollisionCacheBuilder;
pub use config::CollisionCacheConfig;
pub use counters::{CounterRng, FrequencyCounters, ThreadRandom};
pub use entry::KeyVal;
pub use error::ConfigError;
pub use metrics::{CacheMetrics, CollisionCacheMetrics};
pub use sparse::{Loader, Mapper, SparseCollisionCache};

#[cfg(test)]
mod tests {
    use super::*;
    use core::num::NonZeroUsize;
    use scoped_threadpool::Pool;

    #[test]
    fn test_shared_across_pool() {
        // Sparse enough that no bucket overflows.
        let cache = CollisionCacheBuilder::new(NonZeroUsize::new(256).unwrap())
            .hash_table_len(1024)
            .build_loading(|key: &u32| Some(*key), |_, value: u32| u64::from(value) * 2)
            .unwrap();
        let mut pool = Pool::new(4);
        pool.scoped(|scope| {
            for worker in 0..4u32 {
                let cache = &cache;
                scope.execute(move || {
                    for key in worker * 64..(worker + 1) * 64 {
                        assert_eq!(cache.get(&key), Some(u64::from(key) * 2));
                    }
                });
            }
        });
        assert_eq!(cache.len(), 256);
        for key in 0..256 {
            assert_eq!(cache.get_if_present(&key), Some(u64::from(key) * 2));
        }
    }
}
