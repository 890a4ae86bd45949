//! Configuration errors.

/// Largest supported bucket width.
pub const MAX_COLLISIONS_LIMIT: usize = 1 << 16;

/// Reasons a [`CollisionCacheConfig`](crate::config::CollisionCacheConfig)
/// cannot be turned into a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The bucket width is above [`MAX_COLLISIONS_LIMIT`].
    #[error("max_collisions {max_collisions} exceeds the limit of {}", MAX_COLLISIONS_LIMIT)]
    MaxCollisionsTooLarge {
        /// The requested width.
        max_collisions: usize,
    },
    /// New entries would start with a zero counter.
    #[error("init_count must be non-zero")]
    ZeroInitCount,
    /// Counters could never count anything.
    #[error("max_counter_value must be non-zero")]
    ZeroMaxCounterValue,
    /// An explicit table length is zero or not a power of two.
    #[error("hash table length {len} is not a non-zero power of two")]
    InvalidHashTableLen {
        /// The rejected length.
        len: usize,
    },
    /// One counter per position does not fit in `usize`.
    #[error("{table_len} slots of {max_collisions} collisions overflow the counter array")]
    TooManyCounters {
        /// Number of hash slots.
        table_len: usize,
        /// Bucket width.
        max_collisions: usize,
    },
}
