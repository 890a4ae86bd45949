//! Fluent construction of [`SparseCollisionCache`].
//!
//! ```
//! use collision_cache::CollisionCacheBuilder;
//! use core::num::NonZeroUsize;
//!
//! let cache = CollisionCacheBuilder::new(NonZeroUsize::new(1_024).unwrap())
//!     .max_collisions(NonZeroUsize::new(4).unwrap())
//!     .strict_capacity(true)
//!     .build_loading(|key: &u32| Some(key.to_string()), |_, text: String| text.len())
//!     .unwrap();
//!
//! assert_eq!(cache.get(&1234), Some(4));
//! assert_eq!(cache.get_if_present(&1234), Some(4));
//! ```

use core::hash::{BuildHasher, Hash};
use core::num::NonZeroUsize;

use crate::config::CollisionCacheConfig;
use crate::counters::{CounterRng, ThreadRandom};
use crate::error::ConfigError;
use crate::sparse::SparseCollisionCache;
use crate::DefaultHashBuilder;

/// Builder for [`SparseCollisionCache`].
///
/// `S` is the key hasher and `R` the randomness behind counter increments;
/// both can be swapped before building.
#[derive(Debug, Clone)]
pub struct CollisionCacheBuilder<S = DefaultHashBuilder, R = ThreadRandom> {
    config: CollisionCacheConfig,
    hash_builder: S,
    rng: R,
}

impl CollisionCacheBuilder {
    /// Starts from the default configuration for `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::from_config(CollisionCacheConfig::new(capacity))
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: CollisionCacheConfig) -> Self {
        Self {
            config,
            hash_builder: DefaultHashBuilder::default(),
            rng: ThreadRandom,
        }
    }
}

impl<S, R> CollisionCacheBuilder<S, R> {
    /// Entries per bucket, rounded up to a power of two.
    #[must_use]
    pub fn max_collisions(mut self, max_collisions: NonZeroUsize) -> Self {
        self.config.max_collisions = max_collisions;
        self
    }

    /// Refuses to cache into empty buckets once over capacity.
    #[must_use]
    pub fn strict_capacity(mut self, strict: bool) -> Self {
        self.config.strict_capacity = strict;
        self
    }

    /// Counter value seeded for new entries.
    #[must_use]
    pub fn init_count(mut self, init_count: u8) -> Self {
        self.config.init_count = init_count;
        self
    }

    /// Accesses after which a counter is near saturation.
    #[must_use]
    pub fn max_counter_value(mut self, max_counter_value: u32) -> Self {
        self.config.max_counter_value = max_counter_value;
        self
    }

    /// Explicit number of hash slots; must be a power of two.
    #[must_use]
    pub fn hash_table_len(mut self, len: usize) -> Self {
        self.config.hash_table_len = Some(len);
        self
    }

    /// Records hit, miss, load and eviction counts.
    #[must_use]
    pub fn record_metrics(mut self, record: bool) -> Self {
        self.config.record_metrics = record;
        self
    }

    /// Replaces the key hasher.
    pub fn hasher<S2: BuildHasher>(self, hash_builder: S2) -> CollisionCacheBuilder<S2, R> {
        CollisionCacheBuilder {
            config: self.config,
            hash_builder,
            rng: self.rng,
        }
    }

    /// Replaces the randomness source of counter increments.
    pub fn counter_rng<R2: CounterRng>(self, rng: R2) -> CollisionCacheBuilder<S, R2> {
        CollisionCacheBuilder {
            config: self.config,
            hash_builder: self.hash_builder,
            rng,
        }
    }

    /// The configuration built so far.
    pub fn config(&self) -> &CollisionCacheConfig {
        &self.config
    }
}

impl<S: BuildHasher, R: CounterRng> CollisionCacheBuilder<S, R> {
    /// Builds a cache filled only through `put*` and the `get_with` family;
    /// its own loader never produces a value.
    pub fn build<K, V>(self) -> Result<SparseCollisionCache<K, V, V, S, R>, ConfigError>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        SparseCollisionCache::with_hasher_and_rng(
            self.config,
            self.hash_builder,
            self.rng,
            Box::new(|_: &K| None::<V>),
            Box::new(|_: &K, value: V| value),
        )
    }

    /// Builds a loading cache: misses call `loader` and cache the result of
    /// `mapper`.
    pub fn build_loading<K, L, V>(
        self,
        loader: impl Fn(&K) -> Option<L> + Send + Sync + 'static,
        mapper: impl Fn(&K, L) -> V + Send + Sync + 'static,
    ) -> Result<SparseCollisionCache<K, L, V, S, R>, ConfigError>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        SparseCollisionCache::with_hasher_and_rng(
            self.config,
            self.hash_builder,
            self.rng,
            Box::new(loader),
            Box::new(mapper),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_setters_reach_config() {
        let builder = CollisionCacheBuilder::new(nz(64))
            .max_collisions(nz(3))
            .strict_capacity(true)
            .init_count(7)
            .max_counter_value(1 << 10)
            .hash_table_len(32)
            .record_metrics(true);
        let config = builder.config();
        assert_eq!(config.max_collisions.get(), 3);
        assert!(config.strict_capacity);
        assert_eq!(config.init_count, 7);
        assert_eq!(config.max_counter_value, 1 << 10);
        assert_eq!(config.hash_table_len, Some(32));
        assert!(config.record_metrics);
    }

    #[test]
    fn test_build_non_loading() {
        let cache = CollisionCacheBuilder::new(nz(16))
            .hasher(RandomState::new())
            .build::<&str, u32>()
            .unwrap();
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.put_if_absent("a", 1), 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get_with(&"b", |_| Some(2)), Some(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.max_collisions(), 8);
        assert_eq!(cache.hash_table_len(), 2);
        assert!(cache.event_metrics().is_none());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = CollisionCacheBuilder::new(nz(16))
            .hash_table_len(6)
            .build::<u32, u32>();
        assert_eq!(result.err(), Some(ConfigError::InvalidHashTableLen { len: 6 }));

        let result = CollisionCacheBuilder::new(nz(16))
            .init_count(0)
            .build_loading(|_: &u32| Some(1u8), |_, v: u8| v);
        assert_eq!(result.err(), Some(ConfigError::ZeroInitCount));
    }
}
