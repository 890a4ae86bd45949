//! Cache Metrics System
//!
//! Runtime counters for the collision cache, reported through the
//! [`CacheMetrics`] trait as a `BTreeMap` so snapshots always list their keys
//! in the same order.
//!
//! Recording is opt-in (`CollisionCacheConfig::record_metrics`). When enabled,
//! every counter is a relaxed `AtomicU64`: the numbers are statistics, not
//! synchronisation, and a snapshot taken under load is only approximately
//! consistent across keys.
//!
//! | Key               | Meaning                                                   |
//! |-------------------|-----------------------------------------------------------|
//! | `hits`            | lookups answered from a cached entry                      |
//! | `misses`          | lookups that found no entry                               |
//! | `loads`           | loader calls that produced a value                        |
//! | `uncached_loads`  | loaded or offered values returned without being cached    |
//! | `insertions`      | entries placed into a free position                       |
//! | `replacements`    | entries swapped for a new value of the same key           |
//! | `evictions`       | entries overwritten by a different key                    |
//! | `drops`           | entries vacated to bring occupancy back to capacity       |
//! | `removals`        | entries removed through `remove`                          |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait implemented by caches that report metrics.
///
/// Uses BTreeMap so that repeated snapshots, logs and CSV exports list keys in
/// a deterministic order.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Algorithm name for identification.
    fn algorithm_name(&self) -> &'static str;
}

/// Event counters shared by all threads using one cache.
#[derive(Debug, Default)]
pub struct CollisionCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    uncached_loads: AtomicU64,
    insertions: AtomicU64,
    replacements: AtomicU64,
    evictions: AtomicU64,
    drops: AtomicU64,
    removals: AtomicU64,
}

macro_rules! recorders {
    ($($(#[$doc:meta])* $record:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $record(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }

            #[doc = concat!("Current `", stringify!($field), "` count.")]
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.load(Ordering::Relaxed)
            }
        )*
    };
}

impl CollisionCacheMetrics {
    /// Creates a zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    recorders! {
        /// Records a lookup answered from the cache.
        record_hit => hits;
        /// Records a lookup that found no entry.
        record_miss => misses;
        /// Records a loader call that produced a value.
        record_load => loads;
        /// Records a value returned to the caller without being cached.
        record_uncached_load => uncached_loads;
        /// Records an entry placed into a free position.
        record_insertion => insertions;
        /// Records a value replaced under the same key.
        record_replacement => replacements;
        /// Records an entry overwritten by a different key.
        record_eviction => evictions;
        /// Records an entry vacated while over capacity.
        record_drop => drops;
        /// Records an explicit removal.
        record_removal => removals;
    }

    /// Fraction of lookups answered from the cache, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let requests = hits + self.misses();
        if requests > 0 {
            hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Event counters as a BTreeMap, without occupancy figures.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("drops".to_string(), self.drops() as f64);
        metrics.insert("evictions".to_string(), self.evictions() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("hits".to_string(), self.hits() as f64);
        metrics.insert("insertions".to_string(), self.insertions() as f64);
        metrics.insert("loads".to_string(), self.loads() as f64);
        metrics.insert("misses".to_string(), self.misses() as f64);
        metrics.insert("removals".to_string(), self.removals() as f64);
        metrics.insert("replacements".to_string(), self.replacements() as f64);
        metrics.insert(
            "requests".to_string(),
            (self.hits() + self.misses()) as f64,
        );
        metrics.insert("uncached_loads".to_string(), self.uncached_loads() as f64);
        metrics
    }
}
