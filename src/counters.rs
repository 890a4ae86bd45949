//! Approximate Frequency Counters
//!
//! A flat array of one-byte counters, one per bucket position, used to rank
//! entries for eviction. Each counter approximates an access count on a
//! logarithmic scale (a Morris counter): a hit increments the stored value
//! with probability `1 / (count << log_factor)`, so a single byte can stand for
//! around a million real accesses.
//!
//! ```text
//! index = (hash_slot << max_collisions_shift) + position
//!
//!   slot 0          slot 1          slot 2
//! ┌───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//! │ 3 │ 9 │ 1 │ 0 │ 5 │ 0 │ 0 │ 0 │255│ 7 │ 2 │ 4 │   u8 counters
//! └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//! ```
//!
//! # Aging
//!
//! Eviction scans halve the counters of every entry they pass over
//! ([`FrequencyCounters::decay`]). Entries that stop being read lose their
//! priority within a few scans, which gives the policy its time window.
//!
//! # Memory Ordering
//!
//! Loads are `Acquire`, stores are `Release` and increments use an `AcqRel`
//! compare-and-exchange loop. Decay is a plain load followed by a store: an
//! increment landing between the two is lost. Those counter misses are part of
//! the approximation and are not corrected.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use rand::RngCore;

/// Largest value a counter can hold.
pub const MAX_COUNT: u8 = u8::MAX;

/// Counter value seeded into a slot when a new entry lands in it.
pub const DEFAULT_INIT_COUNT: u8 = 3;

/// Number of real accesses that should roughly saturate a counter.
pub const DEFAULT_MAX_COUNTER_VALUE: u32 = 1 << 20;

/// `log2` of the number of accesses that saturate a counter when
/// `log_factor == 0`: `sum(c for c in 1..=255) ≈ 2^15`.
const BASE_LOG2: u32 = 15;

/// Keeps `MAX_COUNT << log_factor` within a `u32`.
const MAX_LOG_FACTOR: u32 = 24;

/// Source of randomness for probabilistic counter increments.
///
/// The default [`ThreadRandom`] draws from the thread-local generator of the
/// `rand` crate. Tests can plug in a deterministic source.
pub trait CounterRng: Send + Sync {
    /// Returns the next uniformly distributed `u32`.
    fn next_u32(&self) -> u32;
}

/// Draws from `rand::thread_rng()`, so concurrent incrementers never share
/// generator state.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl CounterRng for ThreadRandom {
    #[inline]
    fn next_u32(&self) -> u32 {
        rand::thread_rng().next_u32()
    }
}

/// Per-cache array of approximate, decayable access counters.
pub struct FrequencyCounters<R = ThreadRandom> {
    counts: Box<[AtomicU8]>,
    init_count: u8,
    log_factor: u32,
    rng: R,
}

impl<R> FrequencyCounters<R> {
    /// Computes the increment scaling shift for a saturation target.
    pub fn log_factor_for(max_counter_value: u32) -> u32 {
        let pow2 = max_counter_value
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(1 << 31);
        pow2.trailing_zeros()
            .saturating_sub(BASE_LOG2)
            .min(MAX_LOG_FACTOR)
    }

    /// Number of counters.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns `true` if there are no counters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Value seeded by [`init_count`](Self::init_count).
    #[inline]
    pub fn initial_count(&self) -> u8 {
        self.init_count
    }

    /// Shift applied to the current count when drawing an increment.
    #[inline]
    pub fn log_factor(&self) -> u32 {
        self.log_factor
    }
}

impl<R: CounterRng> FrequencyCounters<R> {
    /// Creates `len` zeroed counters.
    ///
    /// `max_counter_value` is the number of hits after which a counter should
    /// be close to [`MAX_COUNT`]; it is rounded up to a power of two.
    pub fn new(len: usize, init_count: u8, max_counter_value: u32, rng: R) -> Self {
        let counts = (0..len).map(|_| AtomicU8::new(0)).collect();
        Self {
            counts,
            init_count,
            log_factor: Self::log_factor_for(max_counter_value),
            rng,
        }
    }

    /// Seeds the counter at `index` with the configured initial value.
    #[inline]
    pub fn init_count(&self, index: usize) {
        self.counts[index].store(self.init_count, Ordering::Release);
    }

    /// Seeds the counter at `index` with `value`.
    #[inline]
    pub fn init_count_to(&self, index: usize, value: u8) {
        self.counts[index].store(value, Ordering::Release);
    }

    /// Current value of the counter at `index`.
    #[inline]
    pub fn count(&self, index: usize) -> u8 {
        self.counts[index].load(Ordering::Acquire)
    }

    /// Records one access to the counter at `index`.
    ///
    /// Saturates at [`MAX_COUNT`]. A lost compare-and-exchange re-reads the
    /// winner's value and draws again against it.
    pub fn increment(&self, index: usize) {
        let cell = &self.counts[index];
        let mut count = cell.load(Ordering::Acquire);
        loop {
            if count == MAX_COUNT || !self.should_increment(count) {
                return;
            }
            match cell.compare_exchange(count, count + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => count = actual,
            }
        }
    }

    #[inline]
    fn should_increment(&self, count: u8) -> bool {
        if count == 0 {
            return true;
        }
        let odds = u32::from(count) << self.log_factor;
        odds <= 1 || self.rng.next_u32() % odds == 0
    }

    /// Halves every counter in `start..end`, except `skip`.
    pub fn decay(&self, start: usize, end: usize, skip: Option<usize>) {
        for index in start..end {
            if Some(index) == skip {
                continue;
            }
            self.halve(index);
        }
    }

    /// Halves the counter at `index`, returning the value it held.
    #[inline]
    pub(crate) fn halve(&self, index: usize) -> u8 {
        let count = self.count(index);
        // Counter misses may occur between these two calls.
        if count != 0 {
            self.counts[index].store(count >> 1, Ordering::Release);
        }
        count
    }

    /// Zeroes the counter of a vacated position.
    #[inline]
    pub(crate) fn reset(&self, index: usize) {
        self.counts[index].store(0, Ordering::Release);
    }
}

impl<R> fmt::Debug for FrequencyCounters<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyCounters")
            .field("len", &self.counts.len())
            .field("init_count", &self.init_count)
            .field("log_factor", &self.log_factor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Always draws zero, so every increment below saturation succeeds.
    struct AlwaysIncrement;

    impl CounterRng for AlwaysIncrement {
        fn next_u32(&self) -> u32 {
            0
        }
    }

    /// Never draws zero once the count is non-zero.
    struct NeverIncrement;

    impl CounterRng for NeverIncrement {
        fn next_u32(&self) -> u32 {
            1
        }
    }

    /// Small xorshift generator shared across threads.
    struct XorShift(AtomicU32);

    impl CounterRng for XorShift {
        fn next_u32(&self) -> u32 {
            let mut x = self.0.load(Ordering::Relaxed);
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0.store(x, Ordering::Relaxed);
            x
        }
    }

    const NUM_COUNTERS: usize = 8;

    #[test]
    fn test_log_factor_for() {
        type C = FrequencyCounters<ThreadRandom>;
        assert_eq!(C::log_factor_for(1 << 20), 5);
        assert_eq!(C::log_factor_for((1 << 20) - 1), 5);
        assert_eq!(C::log_factor_for(1 << 15), 0);
        assert_eq!(C::log_factor_for(1), 0);
        assert_eq!(C::log_factor_for(0), 0);
        assert_eq!(C::log_factor_for(u32::MAX), 16);
    }

    #[test]
    fn test_init_count() {
        let counters = FrequencyCounters::new(NUM_COUNTERS, 3, 1 << 20, ThreadRandom);
        assert_eq!(counters.len(), NUM_COUNTERS);
        for i in 0..NUM_COUNTERS {
            assert_eq!(counters.count(i), 0);
        }
        counters.init_count(2);
        assert_eq!(counters.count(2), 3);
        counters.init_count_to(5, 42);
        assert_eq!(counters.count(5), 42);
    }

    #[test]
    fn test_increment_from_zero_always_succeeds() {
        let counters = FrequencyCounters::new(NUM_COUNTERS, 3, 1 << 20, NeverIncrement);
        counters.increment(0);
        assert_eq!(counters.count(0), 1);
        // Non-zero counts now need a lucky draw.
        counters.increment(0);
        assert_eq!(counters.count(0), 1);
    }

    #[test]
    fn test_saturation() {
        let counters = FrequencyCounters::new(NUM_COUNTERS, 3, 1 << 20, AlwaysIncrement);
        counters.init_count(1);
        for _ in 0..1000 {
            counters.increment(1);
        }
        assert_eq!(counters.count(1), MAX_COUNT);
        counters.increment(1);
        assert_eq!(counters.count(1), MAX_COUNT);
    }

    #[test]
    fn test_decay_halves_and_converges() {
        let counters = FrequencyCounters::new(NUM_COUNTERS, 3, 1 << 20, ThreadRandom);
        let mut init = 2u16;
        for i in 0..NUM_COUNTERS {
            counters.init_count_to(i, init.min(255) as u8);
            assert_eq!(u16::from(counters.count(i)), init.min(255));
            init <<= 1;
        }

        // Index 7 holds 255 and needs nine halvings to reach zero.
        let mut decayed = u32::from(MAX_COUNT);
        for _ in 0..=MAX_COUNT.trailing_ones() {
            counters.decay(0, NUM_COUNTERS, None);
            decayed /= 2;
            assert_eq!(u32::from(counters.count(7)), decayed);
        }

        for i in 0..NUM_COUNTERS {
            assert_eq!(counters.count(i), 0);
        }
    }

    #[test]
    fn test_decay_skips_index_and_respects_range() {
        let counters = FrequencyCounters::new(NUM_COUNTERS, 3, 1 << 20, ThreadRandom);
        for i in 0..NUM_COUNTERS {
            counters.init_count_to(i, 100);
        }
        counters.decay(2, 6, Some(4));
        let expected = [100, 100, 50, 50, 100, 50, 100, 100];
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(counters.count(i), *want, "counter {}", i);
        }
    }

    #[test]
    fn test_deterministic_rng_is_monotonic() {
        let counters = FrequencyCounters::new(
            NUM_COUNTERS,
            3,
            1 << 16,
            XorShift(AtomicU32::new(0x9E37_79B9)),
        );
        counters.init_count(0);
        let mut previous = counters.count(0);
        for _ in 0..50_000 {
            counters.increment(0);
            let current = counters.count(0);
            assert!(current >= previous);
            previous = current;
        }
        assert!(previous > 3);
    }

    /// Follows the Morris curve `accesses ≈ 16 * count^2` for a saturation
    /// target of 2^20, doubling the number of concurrent increments each round.
    #[test]
    fn test_concurrent_increments_follow_log_curve() {
        let counters = Arc::new(FrequencyCounters::new(
            NUM_COUNTERS,
            DEFAULT_INIT_COUNT,
            DEFAULT_MAX_COUNTER_VALUE,
            ThreadRandom,
        ));
        let counter_index = 3;
        counters.init_count(counter_index);

        let num_threads = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4)
            .clamp(4, 16);

        let mut issued: u64 = 0;
        let mut previous = counters.count(counter_index);
        let mut target: u64 = 256;
        while target <= 1 << 22 {
            let batch = target - issued;
            let per_thread = batch / num_threads as u64;
            let barrier = Arc::new(Barrier::new(num_threads));
            let handles: Vec<_> = (0..num_threads)
                .map(|_| {
                    let counters = Arc::clone(&counters);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..per_thread {
                            counters.increment(counter_index);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            issued += per_thread * num_threads as u64;

            let actual = counters.count(counter_index);
            assert!(actual >= previous, "counter went backwards");
            let expected = ((9.0 + issued as f64 / 16.0).sqrt()).min(255.0);
            let delta = 8.0 + expected * 0.25;
            assert!(
                (f64::from(actual) - expected).abs() <= delta,
                "{} accesses: expected {:.1} +- {:.1}, got {}",
                issued,
                expected,
                delta,
                actual
            );
            previous = actual;
            target <<= 1;
        }

        assert_eq!(counters.count(counter_index), MAX_COUNT);
        for i in 0..NUM_COUNTERS {
            if i != counter_index {
                assert_eq!(counters.count(i), 0);
            }
        }
    }
}
