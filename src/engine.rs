//! Collision Table Engine
//!
//! The capacity-agnostic half of the cache: hashing keys to buckets, the
//! lock-free probe, in-place replacement, frequency-driven victim selection and
//! hole-free compaction. [`SparseCollisionCache`](crate::SparseCollisionCache)
//! layers occupancy tracking and admission policy on top.
//!
//! # Probe Protocol
//!
//! A key hashes to exactly one bucket and lives at most once within it.
//! Occupied positions always form a prefix of the bucket once every mutation
//! has completed, so a probe scans positions in order and stops at the first
//! empty one:
//!
//! ```text
//!   position:   0      1      2      3
//!             ┌──────┬──────┬──────┬──────┐
//!             │ k=17 │ k=33 │ k=1  │ ---- │
//!             └──────┴──────┴──────┴──────┘
//!   probe(1)   miss   miss   HIT                 -> bump counter, clone value
//!   probe(49)  miss   miss   miss   VACANT(3)    -> load, try to claim 3
//!   probe(65)  on a full bucket     FULL         -> evict under the lock
//! ```
//!
//! # Victim Selection
//!
//! [`Engine::decay_and_swap`] walks a bucket's counters: the first position
//! whose counter has already decayed to zero is reused and every later counter
//! is halved; otherwise every counter is halved on the way and the first
//! minimum is replaced. Halving as the scan passes is what ages entries that
//! stopped being read.

use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::bucket::{Bucket, BucketTable, EntryRef};
use crate::counters::{CounterRng, FrequencyCounters, MAX_COUNT};
use crate::entry::KeyVal;

/// Result of a lock-free probe.
pub(crate) enum Probe<V> {
    /// The key was found; its counter has been bumped.
    Hit(V),
    /// The key is absent and this is the first empty position.
    Vacant(usize),
    /// The key is absent and every position is taken.
    Full,
}

/// Hash table, counters and the operations that need nothing else.
pub(crate) struct Engine<K, V, S, R> {
    table: BucketTable<K, V>,
    counters: FrequencyCounters<R>,
    hash_builder: S,
    mask: usize,
    shift: u32,
}

impl<K, V, S, R> Engine<K, V, S, R>
where
    K: Hash + Eq,
    S: BuildHasher,
    R: CounterRng,
{
    pub(crate) fn new(
        table_len: usize,
        shift: u32,
        counters: FrequencyCounters<R>,
        hash_builder: S,
    ) -> Self {
        debug_assert!(table_len.is_power_of_two());
        debug_assert_eq!(counters.len(), table_len << shift);
        Self {
            table: BucketTable::new(table_len, 1 << shift),
            counters,
            hash_builder,
            mask: table_len - 1,
            shift,
        }
    }

    #[inline]
    fn slot_of(&self, key: &K) -> usize {
        // Truncation on 32-bit targets only drops bits above the mask.
        #[allow(clippy::cast_possible_truncation)]
        let hash = self.hash_builder.hash_one(key) as usize;
        hash & self.mask
    }

    /// Runs `f` on the key's bucket, allocating it on first use. `f` also
    /// receives the counter index of the bucket's position 0.
    #[inline]
    pub(crate) fn with_bucket<T>(&self, key: &K, f: impl FnOnce(&Bucket<K, V>, usize) -> T) -> T {
        let slot = self.slot_of(key);
        let offset = slot << self.shift;
        self.table.with_bucket(slot, |bucket| f(bucket, offset))
    }

    /// Like [`with_bucket`](Self::with_bucket) but never allocates: returns
    /// `None` when the key's bucket does not exist.
    #[inline]
    pub(crate) fn with_existing_bucket<T>(
        &self,
        key: &K,
        f: impl FnOnce(&Bucket<K, V>, usize) -> Option<T>,
    ) -> Option<T> {
        let slot = self.slot_of(key);
        let offset = slot << self.shift;
        self.table.with_existing(slot, |bucket| f(bucket, offset))
    }

    /// Scans `bucket` for `key` without locking.
    pub(crate) fn probe(&self, bucket: &Bucket<K, V>, offset: usize, key: &K) -> Probe<V>
    where
        V: Clone,
    {
        for index in 0..bucket.width() {
            match bucket.load(index).as_deref() {
                None => return Probe::Vacant(index),
                Some(entry) if entry.is_for(key) => {
                    self.counters.increment(offset + index);
                    return Probe::Hit(entry.value().clone());
                }
                Some(_) => {}
            }
        }
        Probe::Full
    }

    /// Returns the cached value for `key`, bumping its frequency.
    pub(crate) fn get_if_present(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.with_existing_bucket(key, |bucket, offset| match self.probe(bucket, offset, key) {
            Probe::Hit(value) => Some(value),
            Probe::Vacant(_) | Probe::Full => None,
        })
    }

    /// Swaps a new value in for an existing key.
    ///
    /// Returns the value now cached, which is the racing writer's value if
    /// another replacement of the same key won, or `None` if the key is not
    /// cached. Counters are left untouched.
    pub(crate) fn replace(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let slot = self.slot_of(&key);
        let bucket = self.table.bucket(slot)?;
        let entry = Arc::new(KeyVal::new(key, value));
        for index in 0..bucket.width() {
            let current = bucket.load_full(index)?;
            if !current.is_for(entry.key()) {
                continue;
            }
            match bucket.compare_exchange(index, &current, Arc::clone(&entry)) {
                Ok(()) => return Some(entry.value().clone()),
                Err(Some(witness)) if witness.is_for(entry.key()) => {
                    return Some(witness.value().clone());
                }
                // Shifted away by a concurrent removal; keep scanning.
                Err(_) => {}
            }
        }
        None
    }

    /// Places `entry` at `index`, overwriting whatever is there, and seeds its
    /// counter.
    #[inline]
    pub(crate) fn place(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        index: usize,
        entry: EntryRef<K, V>,
    ) {
        bucket.store(index, Some(entry));
        self.counters.init_count(offset + index);
    }

    /// Replaces the least frequently used of the occupied positions
    /// `0..end - offset` with `entry`, halving counters on the way. Returns
    /// the position that received the entry.
    ///
    /// Must be called with the bucket lock held and every position in range
    /// occupied.
    pub(crate) fn decay_and_swap(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        end: usize,
        entry: EntryRef<K, V>,
    ) -> usize {
        let mut min_count = MAX_COUNT;
        let mut min_index = offset;
        for counter_index in offset..end {
            let count = self.counters.halve(counter_index);
            if count == 0 {
                self.place(bucket, offset, counter_index - offset, entry);
                self.counters.decay(counter_index + 1, end, None);
                return counter_index - offset;
            }
            if count < min_count {
                min_count = count;
                min_index = counter_index;
            }
        }
        self.place(bucket, offset, min_index - offset, entry);
        min_index - offset
    }

    /// Closes the gap at `from` by moving every later entry one position to
    /// the left, carrying each counter halved. The last vacated position ends
    /// empty with a zero counter.
    ///
    /// Must be called with the bucket lock held. Lock-free inserters may still
    /// claim the trailing empty position while the shift runs; an entry that
    /// appears behind the gap is pulled forward so no hole is left.
    pub(crate) fn shift_left(&self, bucket: &Bucket<K, V>, offset: usize, from: usize) {
        let width = bucket.width();
        let mut index = from;
        loop {
            let next = index + 1;
            if next == width {
                self.counters.reset(offset + index);
                bucket.store(index, None);
                return;
            }
            match bucket.load_full(next) {
                Some(entry) => bucket.store(index, Some(entry)),
                None => {
                    self.counters.reset(offset + index);
                    bucket.store(index, None);
                    let Some(late) = bucket.load_full(next) else {
                        return;
                    };
                    if bucket.insert_if_empty(index, &late).is_err() {
                        return;
                    }
                }
            }
            // Counter misses may occur during this transition.
            let count = self.counters.count(offset + next);
            self.counters.init_count_to(offset + index, count >> 1);
            index = next;
        }
    }

    /// Empties one bucket, resetting its counters. With `detach` the bucket is
    /// also unlinked from the table. Returns the number of entries vacated.
    pub(crate) fn sweep_slot(&self, slot: usize, detach: bool) -> usize {
        let bucket = if detach {
            self.table.detach(slot)
        } else {
            self.table.bucket(slot)
        };
        let Some(bucket) = bucket else {
            return 0;
        };
        let _guard = bucket.lock();
        let offset = slot << self.shift;
        (0..bucket.width())
            .filter(|&index| {
                self.counters.reset(offset + index);
                bucket.take(index).is_some()
            })
            .count()
    }
}

impl<K, V, S, R> Engine<K, V, S, R>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Sync,
    R: CounterRng,
{
    /// Sweeps every slot, in parallel for large tables. Returns the number of
    /// entries vacated.
    pub(crate) fn sweep(&self, detach: bool) -> usize {
        self.table.sweep(|slot| self.sweep_slot(slot, detach))
    }
}

impl<K, V, S, R> Engine<K, V, S, R> {
    #[inline]
    pub(crate) fn counters(&self) -> &FrequencyCounters<R> {
        &self.counters
    }

    #[inline]
    pub(crate) fn width(&self) -> usize {
        1 << self.shift
    }

    #[inline]
    pub(crate) fn table_len(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn allocated_buckets(&self) -> usize {
        self.table.allocated()
    }
}

impl<K, V, S, R> fmt::Display for Engine<K, V, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_collisions: {}, counters: {}, init_count: {}, hash_table_len: {}",
            1usize << self.shift,
            self.counters.len(),
            self.counters.initial_count(),
            self.table.len()
        )
    }
}
