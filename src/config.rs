//! Cache Configuration Module
//!
//! [`CollisionCacheConfig`] holds every sizing and policy knob of a
//! [`SparseCollisionCache`](crate::SparseCollisionCache). Fields are public so
//! a config can be written out as a struct literal; [`CollisionCacheConfig::new`]
//! and the `with_*` helpers cover the common case of tweaking a few defaults.
//!
//! # Sizing Guidelines
//!
//! The cache is a power-of-two table of buckets, each holding up to
//! `max_collisions` entries:
//!
//! ```text
//! max_collisions = next_power_of_two(max_collisions)
//! hash_table_len = next_power_of_two(ceil(capacity / max_collisions))
//! counters       = hash_table_len * max_collisions   (one byte each)
//! ```
//!
//! Wider buckets tolerate skewed hashes and give the eviction scan more
//! candidates, at the cost of longer probes. The table is usually larger than
//! `capacity` strictly needs, so most buckets run partly empty and eviction is
//! driven by the global occupancy count rather than by full buckets.
//!
//! | Field               | Default                | Meaning                                  |
//! |---------------------|------------------------|------------------------------------------|
//! | `capacity`          | required               | target number of cached entries          |
//! | `max_collisions`    | 8                      | bucket width, rounded up to a power of 2 |
//! | `strict_capacity`   | `false`                | refuse to overshoot on empty buckets     |
//! | `init_count`        | 3                      | counter value of a fresh entry           |
//! | `max_counter_value` | 2^20                   | accesses that saturate a counter         |
//! | `hash_table_len`    | derived                | explicit table length (power of 2)       |
//! | `record_metrics`    | `false`                | keep hit/miss/eviction counters          |
//!
//! # Examples
//!
//! ```
//! use collision_cache::config::CollisionCacheConfig;
//! use core::num::NonZeroUsize;
//!
//! let config = CollisionCacheConfig::new(NonZeroUsize::new(1_000).unwrap())
//!     .with_max_collisions(NonZeroUsize::new(6).unwrap())
//!     .with_strict_capacity(true);
//! assert!(config.validate().is_ok());
//! ```

use core::fmt;
use core::num::NonZeroUsize;

use crate::counters::{DEFAULT_INIT_COUNT, DEFAULT_MAX_COUNTER_VALUE};
use crate::error::{ConfigError, MAX_COLLISIONS_LIMIT};

/// Default bucket width.
pub const DEFAULT_MAX_COLLISIONS: NonZeroUsize = match NonZeroUsize::new(8) {
    Some(width) => width,
    None => panic!("bucket width must be non-zero"),
};

/// Configuration for a [`SparseCollisionCache`](crate::SparseCollisionCache).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CollisionCacheConfig {
    /// Target number of cached entries.
    pub capacity: NonZeroUsize,
    /// Entries per bucket. Rounded up to a power of two, at most 2^16.
    pub max_collisions: NonZeroUsize,
    /// When set, a miss that lands on an empty bucket while the cache is over
    /// capacity returns the loaded value without caching it.
    pub strict_capacity: bool,
    /// Counter value seeded for newly cached entries. Must be non-zero.
    pub init_count: u8,
    /// Number of accesses after which a counter should be near saturation.
    pub max_counter_value: u32,
    /// Explicit number of hash slots; must be a power of two.
    pub hash_table_len: Option<usize>,
    /// Enables [`CacheMetrics`](crate::metrics::CacheMetrics) event counters.
    pub record_metrics: bool,
}

impl CollisionCacheConfig {
    /// Creates a configuration with default settings for `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            max_collisions: DEFAULT_MAX_COLLISIONS,
            strict_capacity: false,
            init_count: DEFAULT_INIT_COUNT,
            max_counter_value: DEFAULT_MAX_COUNTER_VALUE,
            hash_table_len: None,
            record_metrics: false,
        }
    }

    /// Sets the bucket width.
    #[must_use]
    pub fn with_max_collisions(mut self, max_collisions: NonZeroUsize) -> Self {
        self.max_collisions = max_collisions;
        self
    }

    /// Refuses to cache into empty buckets once over capacity.
    #[must_use]
    pub fn with_strict_capacity(mut self, strict: bool) -> Self {
        self.strict_capacity = strict;
        self
    }

    /// Sets the counter value of new entries.
    #[must_use]
    pub fn with_init_count(mut self, init_count: u8) -> Self {
        self.init_count = init_count;
        self
    }

    /// Sets the access count at which counters saturate.
    #[must_use]
    pub fn with_max_counter_value(mut self, max_counter_value: u32) -> Self {
        self.max_counter_value = max_counter_value;
        self
    }

    /// Fixes the number of hash slots instead of deriving it.
    #[must_use]
    pub fn with_hash_table_len(mut self, len: usize) -> Self {
        self.hash_table_len = Some(len);
        self
    }

    /// Turns event counting on or off.
    #[must_use]
    pub fn with_metrics(mut self, record: bool) -> Self {
        self.record_metrics = record;
        self
    }

    /// Checks the configuration without allocating anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry().map(|_| ())
    }

    /// Resolves the table layout described by this configuration.
    pub(crate) fn geometry(&self) -> Result<Geometry, ConfigError> {
        if self.init_count == 0 {
            return Err(ConfigError::ZeroInitCount);
        }
        if self.max_counter_value == 0 {
            return Err(ConfigError::ZeroMaxCounterValue);
        }

        let max_collisions = self.max_collisions.get();
        if max_collisions > MAX_COLLISIONS_LIMIT {
            return Err(ConfigError::MaxCollisionsTooLarge { max_collisions });
        }
        let width = max_collisions.next_power_of_two();

        let table_len = match self.hash_table_len {
            Some(len) if len == 0 || !len.is_power_of_two() => {
                return Err(ConfigError::InvalidHashTableLen { len });
            }
            Some(len) => len,
            None => self
                .capacity
                .get()
                .div_ceil(width)
                .checked_next_power_of_two()
                .ok_or(ConfigError::TooManyCounters {
                    table_len: usize::MAX,
                    max_collisions: width,
                })?,
        };

        let num_counters = table_len
            .checked_mul(width)
            .ok_or(ConfigError::TooManyCounters {
                table_len,
                max_collisions: width,
            })?;

        Ok(Geometry {
            width,
            shift: width.trailing_zeros(),
            table_len,
            num_counters,
        })
    }
}

impl fmt::Debug for CollisionCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollisionCacheConfig")
            .field("capacity", &self.capacity)
            .field("max_collisions", &self.max_collisions)
            .field("strict_capacity", &self.strict_capacity)
            .field("init_count", &self.init_count)
            .field("max_counter_value", &self.max_counter_value)
            .field("hash_table_len", &self.hash_table_len)
            .field("record_metrics", &self.record_metrics)
            .finish()
    }
}

/// Resolved table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub width: usize,
    pub shift: u32,
    pub table_len: usize,
    pub num_counters: usize,
}
