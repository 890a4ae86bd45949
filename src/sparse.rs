//! Sparse Collision Cache
//!
//! The capacity-bounded cache. A global occupancy count decides whether a miss
//! may claim a free bucket position or has to evict, so the table can be much
//! larger than `capacity` while the number of cached entries stays close to it.
//!
//! # Admission
//!
//! ```text
//!             probe
//!   ┌───────────┼──────────────┐
//!  hit       vacant(i)        full
//!   │           │               │
//!   │   i == 0 && strict      lock, track min counter
//!   │   && over capacity?       │
//!   │     │yes      │no       evict min, halve the rest,
//!   │  return     │           drop a zero counter while
//!   │  uncached   │           over capacity
//!   │      over capacity && i > 0?
//!   │          │yes        │no
//!   │       evict min    CAS into i, i+1, ...
//!   ▼
//!  bump counter, clone value
//! ```
//!
//! A free position is claimed while occupancy is at most `capacity`, so a
//! cache may hold `capacity + 1` entries before it starts evicting. Position
//! 0 of an empty bucket has no resident to evict. A lenient cache fills it
//! anyway and overshoots further; the overshoot is paid back by later
//! evictions, whose scans vacate an entry whose counter has decayed to zero
//! while occupancy is above capacity ("drops"). A strict cache returns
//! the loaded value without caching it once it is over capacity.
//!
//! # Locking
//!
//! Hits never lock. Misses in [`get`](SparseCollisionCache::get) load under
//! the bucket's mutex, so concurrent misses on one key call the loader once
//! and everyone returns the same value. The `get_aggressive*` and `put*`
//! families load or insert without the lock and only take it to evict.
//!
//! The bucket lock is reentrant: a loader running under it may read other
//! keys of the cache, including keys of the same bucket.

use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bucket::{Bucket, EntryRef};
use crate::config::CollisionCacheConfig;
use crate::counters::{CounterRng, FrequencyCounters, ThreadRandom, MAX_COUNT};
use crate::engine::{Engine, Probe};
use crate::entry::KeyVal;
use crate::error::ConfigError;
use crate::metrics::{CacheMetrics, CollisionCacheMetrics};
use crate::DefaultHashBuilder;

/// Loads the raw value for a missing key. `None` means there is nothing to
/// cache.
pub type Loader<K, L> = Box<dyn Fn(&K) -> Option<L> + Send + Sync>;

/// Turns a loaded value into the cached value.
pub type Mapper<K, L, V> = Box<dyn Fn(&K, L) -> V + Send + Sync>;

/// Outcome of trying to claim a free position.
enum Claim<K, V> {
    Inserted,
    /// Another thread cached the same key first, at this position.
    Raced(EntryRef<K, V>, usize),
    /// No free position was left, or the cache went over capacity.
    Exhausted,
}

/// What to do when the key being admitted is already cached.
#[derive(Clone, Copy)]
enum OnMatch {
    /// Return the cached value.
    Keep,
    /// Return the cached value and count the access.
    Bump,
    /// Swap in the new value.
    Replace,
}

/// A concurrent, capacity-bounded cache with approximate LFU eviction.
///
/// `K` keys are hashed with `S` into a power-of-two table of buckets. Misses
/// are filled by a loader producing an `L`, which a mapper turns into the
/// cached `V`. `R` supplies randomness for the frequency counters.
///
/// Build one with [`CollisionCacheBuilder`](crate::CollisionCacheBuilder) or
/// [`SparseCollisionCache::init`].
pub struct SparseCollisionCache<K, L, V, S = DefaultHashBuilder, R = ThreadRandom> {
    engine: Engine<K, V, S, R>,
    capacity: usize,
    strict: bool,
    size: AtomicUsize,
    loader: Loader<K, L>,
    mapper: Mapper<K, L, V>,
    metrics: Option<CollisionCacheMetrics>,
    sweep_lock: Mutex<()>,
}

#[inline]
fn into_ok<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

impl<K, L, V> SparseCollisionCache<K, L, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a loading cache with the default hasher and counter randomness.
    pub fn init(
        config: CollisionCacheConfig,
        loader: impl Fn(&K) -> Option<L> + Send + Sync + 'static,
        mapper: impl Fn(&K, L) -> V + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        Self::with_hasher_and_rng(
            config,
            DefaultHashBuilder::default(),
            ThreadRandom,
            Box::new(loader),
            Box::new(mapper),
        )
    }
}

impl<K, L, V, S, R> SparseCollisionCache<K, L, V, S, R>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
    R: CounterRng,
{
    /// Creates a cache with an explicit hasher and counter randomness source.
    pub fn with_hasher_and_rng(
        config: CollisionCacheConfig,
        hash_builder: S,
        rng: R,
        loader: Loader<K, L>,
        mapper: Mapper<K, L, V>,
    ) -> Result<Self, ConfigError> {
        let geometry = config.geometry()?;
        let counters = FrequencyCounters::new(
            geometry.num_counters,
            config.init_count,
            config.max_counter_value,
            rng,
        );
        debug!(
            capacity = config.capacity.get(),
            max_collisions = geometry.width,
            hash_table_len = geometry.table_len,
            strict = config.strict_capacity,
            log_factor = counters.log_factor(),
            "created collision cache"
        );
        Ok(Self {
            engine: Engine::new(geometry.table_len, geometry.shift, counters, hash_builder),
            capacity: config.capacity.get(),
            strict: config.strict_capacity,
            size: AtomicUsize::new(0),
            loader,
            mapper,
            metrics: config.record_metrics.then(CollisionCacheMetrics::new),
            sweep_lock: Mutex::new(()),
        })
    }

    /// Returns the cached value for `key`, loading and caching it on a miss
    /// with the configured loader and mapper.
    ///
    /// Returns `None` only if the key is absent and the loader produced
    /// nothing.
    pub fn get(&self, key: &K) -> Option<V> {
        into_ok(self.get_or_load(key, |key| {
            Ok((self.loader)(key).map(|loaded| (self.mapper)(key, loaded)))
        }))
    }

    /// Like [`get`](Self::get) with a one-off loader producing the final
    /// value.
    pub fn get_with(&self, key: &K, load: impl FnOnce(&K) -> Option<V>) -> Option<V> {
        into_ok(self.get_or_load(key, |key| Ok(load(key))))
    }

    /// Like [`get_with`](Self::get_with) with a fallible loader. A loader
    /// error is returned unchanged and nothing is cached.
    pub fn try_get_with<E>(
        &self,
        key: &K,
        load: impl FnOnce(&K) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, E> {
        self.get_or_load(key, load)
    }

    /// Returns the cached value for `key` without loading. Only the access
    /// counter of a hit is updated.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let value = self.engine.get_if_present(key);
        self.record(if value.is_some() {
            CollisionCacheMetrics::record_hit
        } else {
            CollisionCacheMetrics::record_miss
        });
        value
    }

    /// Like [`get`](Self::get), but a miss loads and claims a free position
    /// without taking the bucket lock. Concurrent misses on one key may all
    /// call the loader; the first insert wins and the others return its value.
    pub fn get_aggressive(&self, key: &K) -> Option<V> {
        into_ok(self.load_aggressive(
            key,
            |key| Ok((self.loader)(key)),
            |key, loaded| (self.mapper)(key, loaded),
        ))
    }

    /// [`get_aggressive`](Self::get_aggressive) with a one-off loader and
    /// mapper.
    pub fn get_aggressive_with<I>(
        &self,
        key: &K,
        loader: impl FnOnce(&K) -> Option<I>,
        mapper: impl FnOnce(&K, I) -> V,
    ) -> Option<V> {
        into_ok(self.load_aggressive(key, |key| Ok(loader(key)), mapper))
    }

    /// [`get_aggressive_with`](Self::get_aggressive_with) with a fallible
    /// loader.
    pub fn try_get_aggressive_with<I, E>(
        &self,
        key: &K,
        loader: impl FnOnce(&K) -> Result<Option<I>, E>,
        mapper: impl FnOnce(&K, I) -> V,
    ) -> Result<Option<V>, E> {
        self.load_aggressive(key, loader, mapper)
    }

    /// Replaces the value of a cached key. Returns the value now cached, or
    /// `None` if `key` is not cached.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        let replaced = self.engine.replace(key, value);
        if replaced.is_some() {
            self.record(CollisionCacheMetrics::record_replacement);
        }
        replaced
    }

    /// Caches `value`, replacing any existing value and evicting if needed.
    ///
    /// Returns the value now associated with `key`: `value` itself, or a
    /// racing writer's value for the same key. A strict cache over capacity
    /// hands `value` back uncached when it would land on an empty bucket.
    pub fn put_replace(&self, key: K, value: V) -> V {
        self.put(key, value, OnMatch::Replace)
    }

    /// Caches `value` unless `key` is already cached, evicting if needed.
    /// Returns the value now associated with `key`.
    pub fn put_if_absent(&self, key: K, value: V) -> V {
        self.put(key, value, OnMatch::Keep)
    }

    /// Caches `value` only into a free position while the cache is not over
    /// capacity. Never evicts.
    ///
    /// Returns the existing value if `key` is cached, `value` if it was
    /// inserted, or `None` if there was no room.
    pub fn put_if_space_absent(&self, key: K, value: V) -> Option<V> {
        self.put_if_space(key, value, OnMatch::Keep)
    }

    /// Like [`put_if_space_absent`](Self::put_if_space_absent) but replaces
    /// an existing value.
    pub fn put_if_space_replace(&self, key: K, value: V) -> Option<V> {
        self.put_if_space(key, value, OnMatch::Replace)
    }

    /// Removes `key`, compacting its bucket. Returns the removed value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.engine.with_existing_bucket(key, |bucket, offset| {
            let _guard = bucket.lock();
            for index in 0..bucket.width() {
                let current = bucket.load_full(index)?;
                if current.is_for(key) {
                    self.release(1);
                    self.engine.shift_left(bucket, offset, index);
                    self.record(CollisionCacheMetrics::record_removal);
                    return Some(current.value().clone());
                }
            }
            None
        })
    }

    fn get_or_load<E>(
        &self,
        key: &K,
        load: impl FnOnce(&K) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, E> {
        self.engine.with_bucket(key, |bucket, offset| {
            match self.engine.probe(bucket, offset, key) {
                Probe::Hit(value) => {
                    self.record(CollisionCacheMetrics::record_hit);
                    Ok(Some(value))
                }
                Probe::Vacant(_) => self.check_decay_and_swap(bucket, offset, key, load),
                Probe::Full => self.check_decay_and_prob_swap(bucket, offset, key, load),
            }
        })
    }

    /// Miss on a bucket with free space: re-probe under the lock, then load
    /// and claim a position, evicting instead when over capacity.
    fn check_decay_and_swap<E>(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        key: &K,
        load: impl FnOnce(&K) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, E> {
        if self.is_over() {
            return self.check_decay_and_prob_swap(bucket, offset, key, load);
        }
        let _guard = bucket.lock();
        let width = bucket.width();
        for index in 0..width {
            let Some(current) = bucket.load_full(index) else {
                let Some(value) = self.load_value(key, load)? else {
                    return Ok(None);
                };
                if index == 0 {
                    if self.strict && self.is_over() {
                        return Ok(Some(self.reject(value)));
                    }
                } else if self.is_over() {
                    let entry = new_entry(key, value);
                    self.decay_swap_and_drop(bucket, offset, offset + index, Arc::clone(&entry));
                    return Ok(Some(entry.value().clone()));
                }
                let entry = new_entry(key, value);
                let value = match self.claim(bucket, offset, index, &entry, false) {
                    Claim::Inserted => entry.value().clone(),
                    Claim::Raced(winner, at) => self.hit_existing(offset + at, &winner),
                    Claim::Exhausted => {
                        self.engine_swap(bucket, offset, offset + width, Arc::clone(&entry));
                        entry.value().clone()
                    }
                };
                return Ok(Some(value));
            };
            if current.is_for(key) {
                return Ok(Some(self.hit_existing(offset + index, &current)));
            }
        }

        let Some(value) = self.load_value(key, load)? else {
            return Ok(None);
        };
        let entry = new_entry(key, value);
        if self.is_over() {
            self.decay_swap_and_drop(bucket, offset, offset + width, Arc::clone(&entry));
        } else {
            self.engine_swap(bucket, offset, offset + width, Arc::clone(&entry));
        }
        Ok(Some(entry.value().clone()))
    }

    /// Miss on a full bucket or over capacity: re-probe under the lock while
    /// tracking the least used position, then load and evict it.
    fn check_decay_and_prob_swap<E>(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        key: &K,
        load: impl FnOnce(&K) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, E> {
        let _guard = bucket.lock();
        let counters = self.engine.counters();
        let width = bucket.width();
        let mut min_count = MAX_COUNT;
        let mut min_index = offset;
        for index in 0..width {
            let counter_index = offset + index;
            let Some(current) = bucket.load_full(index) else {
                let Some(value) = self.load_value(key, load)? else {
                    return Ok(None);
                };
                if index == 0 {
                    if self.strict && self.is_over() {
                        return Ok(Some(self.reject(value)));
                    }
                } else if self.is_over() {
                    let entry = new_entry(key, value);
                    self.evict(bucket, offset, min_index, Arc::clone(&entry));
                    self.decay_and_drop(bucket, offset, counter_index, min_index);
                    return Ok(Some(entry.value().clone()));
                }
                let entry = new_entry(key, value);
                let value = match self.claim(bucket, offset, index, &entry, false) {
                    Claim::Inserted => entry.value().clone(),
                    Claim::Raced(winner, at) => self.hit_existing(offset + at, &winner),
                    Claim::Exhausted => {
                        self.evict(bucket, offset, min_index, Arc::clone(&entry));
                        counters.decay(offset, offset + width, Some(min_index));
                        entry.value().clone()
                    }
                };
                return Ok(Some(value));
            };
            if current.is_for(key) {
                return Ok(Some(self.hit_existing(counter_index, &current)));
            }
            let count = counters.count(counter_index);
            if count < min_count {
                min_count = count;
                min_index = counter_index;
            }
        }

        let Some(value) = self.load_value(key, load)? else {
            return Ok(None);
        };
        let entry = new_entry(key, value);
        self.evict(bucket, offset, min_index, Arc::clone(&entry));
        self.decay_or_drop(bucket, offset, offset + width, min_index);
        Ok(Some(entry.value().clone()))
    }

    fn load_aggressive<I, E>(
        &self,
        key: &K,
        loader: impl FnOnce(&K) -> Result<Option<I>, E>,
        mapper: impl FnOnce(&K, I) -> V,
    ) -> Result<Option<V>, E> {
        self.engine.with_bucket(key, |bucket, offset| {
            let vacant = match self.engine.probe(bucket, offset, key) {
                Probe::Hit(value) => {
                    self.record(CollisionCacheMetrics::record_hit);
                    return Ok(Some(value));
                }
                Probe::Vacant(index) => Some(index),
                Probe::Full => None,
            };
            let Some(loaded) = self.load_value(key, loader)? else {
                return Ok(None);
            };
            let value = mapper(key, loaded);

            let Some(index) = vacant else {
                let entry = new_entry(key, value);
                return Ok(Some(self.admit_locked(bucket, offset, &entry, OnMatch::Bump)));
            };
            if index == 0 {
                if self.strict && self.is_over() {
                    return Ok(Some(self.reject(value)));
                }
            } else if self.is_over() {
                let entry = new_entry(key, value);
                return Ok(Some(self.admit_locked(bucket, offset, &entry, OnMatch::Bump)));
            }
            let entry = new_entry(key, value);
            let value = match self.claim(bucket, offset, index, &entry, true) {
                Claim::Inserted => entry.value().clone(),
                Claim::Raced(winner, at) => self.hit_existing(offset + at, &winner),
                Claim::Exhausted => self.admit_locked(bucket, offset, &entry, OnMatch::Bump),
            };
            Ok(Some(value))
        })
    }

    fn put(&self, key: K, value: V, on_match: OnMatch) -> V {
        let entry = Arc::new(KeyVal::new(key, value));
        self.engine.with_bucket(entry.key(), |bucket, offset| {
            for index in 0..bucket.width() {
                let Some(current) = bucket.load_full(index) else {
                    if index == 0 {
                        if self.strict && self.is_over() {
                            return self.reject(entry.value().clone());
                        }
                    } else if self.is_over() {
                        break;
                    }
                    match self.claim(bucket, offset, index, &entry, true) {
                        Claim::Inserted => return entry.value().clone(),
                        Claim::Raced(winner, _) => return winner.value().clone(),
                        Claim::Exhausted => break,
                    }
                };
                if current.is_for(entry.key()) {
                    if let Some(value) =
                        self.resolve_match(bucket, offset, index, &current, &entry, on_match)
                    {
                        return value;
                    }
                }
            }
            self.admit_locked(bucket, offset, &entry, on_match)
        })
    }

    fn put_if_space(&self, key: K, value: V, on_match: OnMatch) -> Option<V> {
        let entry = Arc::new(KeyVal::new(key, value));
        self.engine.with_bucket(entry.key(), |bucket, offset| {
            for index in 0..bucket.width() {
                let Some(current) = bucket.load_full(index) else {
                    if self.is_over() {
                        return None;
                    }
                    return match self.claim(bucket, offset, index, &entry, true) {
                        Claim::Inserted => Some(entry.value().clone()),
                        Claim::Raced(winner, _) => Some(winner.value().clone()),
                        Claim::Exhausted => None,
                    };
                };
                if current.is_for(entry.key()) {
                    let resolved =
                        self.resolve_match(bucket, offset, index, &current, &entry, on_match);
                    if resolved.is_some() {
                        return resolved;
                    }
                }
            }
            None
        })
    }

    /// Locked admission of an already built entry: re-probe, then fill
    /// position 0 of an empty bucket or evict the least used entry.
    fn admit_locked(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        entry: &EntryRef<K, V>,
        on_match: OnMatch,
    ) -> V {
        let _guard = bucket.lock();
        let counters = self.engine.counters();
        let width = bucket.width();
        let mut min_count = MAX_COUNT;
        let mut min_index = offset;
        for index in 0..width {
            let counter_index = offset + index;
            let Some(current) = bucket.load_full(index) else {
                if index == 0 {
                    if self.strict && self.is_over() {
                        return self.reject(entry.value().clone());
                    }
                    return match bucket.insert_if_empty(0, entry) {
                        Ok(()) => {
                            self.admitted(offset);
                            entry.value().clone()
                        }
                        Err(occupant) if occupant.is_for(entry.key()) => match on_match {
                            OnMatch::Bump => self.hit_existing(offset, &occupant),
                            OnMatch::Keep | OnMatch::Replace => occupant.value().clone(),
                        },
                        Err(_) => self.reject(entry.value().clone()),
                    };
                }
                self.evict(bucket, offset, min_index, Arc::clone(entry));
                self.decay_and_drop(bucket, offset, counter_index, min_index);
                return entry.value().clone();
            };
            if current.is_for(entry.key()) {
                if let Some(value) =
                    self.resolve_match(bucket, offset, index, &current, entry, on_match)
                {
                    return value;
                }
            }
            let count = counters.count(counter_index);
            if count < min_count {
                min_count = count;
                min_index = counter_index;
            }
        }

        self.evict(bucket, offset, min_index, Arc::clone(entry));
        self.decay_or_drop(bucket, offset, offset + width, min_index);
        entry.value().clone()
    }

    /// Settles an admission whose key is already cached at `index`. Returns
    /// `None` if a replacement lost to a different key moving into the
    /// position.
    fn resolve_match(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        index: usize,
        current: &EntryRef<K, V>,
        entry: &EntryRef<K, V>,
        on_match: OnMatch,
    ) -> Option<V> {
        match on_match {
            OnMatch::Keep => Some(current.value().clone()),
            OnMatch::Bump => Some(self.hit_existing(offset + index, current)),
            OnMatch::Replace => match bucket.compare_exchange(index, current, Arc::clone(entry)) {
                Ok(()) => {
                    self.record(CollisionCacheMetrics::record_replacement);
                    Some(entry.value().clone())
                }
                // A racing writer for the same key wins.
                Err(Some(witness)) if witness.is_for(entry.key()) => {
                    Some(witness.value().clone())
                }
                Err(_) => None,
            },
        }
    }

    /// CAS `entry` into the first free position at or after `start`.
    ///
    /// With `stop_when_over` the attempt also ends once the cache exceeds
    /// capacity.
    fn claim(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        start: usize,
        entry: &EntryRef<K, V>,
        stop_when_over: bool,
    ) -> Claim<K, V> {
        let width = bucket.width();
        let mut index = start;
        loop {
            match bucket.insert_if_empty(index, entry) {
                Ok(()) => {
                    self.admitted(offset + index);
                    return Claim::Inserted;
                }
                Err(occupant) if occupant.is_for(entry.key()) => {
                    return Claim::Raced(occupant, index);
                }
                Err(_) => {}
            }
            index += 1;
            if index == width || (stop_when_over && self.is_over()) {
                return Claim::Exhausted;
            }
        }
    }

    /// Evicts the least used entry among the occupied positions below
    /// `end`, preferring one whose counter already reached zero. When over
    /// capacity, a later zero counter is dropped as well.
    fn decay_swap_and_drop(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        end: usize,
        entry: EntryRef<K, V>,
    ) {
        let counters = self.engine.counters();
        let mut min_count = MAX_COUNT;
        let mut min_index = offset;
        for counter_index in offset..end {
            let count = counters.halve(counter_index);
            if count == 0 {
                self.evict(bucket, offset, counter_index, entry);
                for later in counter_index + 1..end {
                    if counters.halve(later) == 0 && self.release_over_capacity() {
                        self.drop_at(bucket, offset, later);
                        return;
                    }
                }
                return;
            }
            if count < min_count {
                min_count = count;
                min_index = counter_index;
            }
        }
        self.evict(bucket, offset, min_index, entry);
    }

    /// Halves every counter below `end` except `skip`; while over capacity
    /// the first zero counter after `skip` is dropped and the bucket
    /// compacted.
    fn decay_and_drop(&self, bucket: &Bucket<K, V>, offset: usize, end: usize, skip: usize) {
        let counters = self.engine.counters();
        for counter_index in offset..end {
            if counter_index == skip {
                continue;
            }
            if counters.halve(counter_index) != 0 || counter_index < skip {
                continue;
            }
            if self.release_over_capacity() {
                self.drop_at(bucket, offset, counter_index);
                return;
            }
        }
    }

    fn decay_or_drop(&self, bucket: &Bucket<K, V>, offset: usize, end: usize, skip: usize) {
        if self.is_over() {
            self.decay_and_drop(bucket, offset, end, skip);
        } else {
            self.engine.counters().decay(offset, end, Some(skip));
        }
    }

    fn engine_swap(&self, bucket: &Bucket<K, V>, offset: usize, end: usize, entry: EntryRef<K, V>) {
        let position = self.engine.decay_and_swap(bucket, offset, end, entry);
        trace!(position, "evicted entry");
        self.record(CollisionCacheMetrics::record_eviction);
    }

    fn evict(
        &self,
        bucket: &Bucket<K, V>,
        offset: usize,
        counter_index: usize,
        entry: EntryRef<K, V>,
    ) {
        let position = counter_index - offset;
        trace!(position, "evicted entry");
        self.record(CollisionCacheMetrics::record_eviction);
        self.engine.place(bucket, offset, position, entry);
    }

    fn drop_at(&self, bucket: &Bucket<K, V>, offset: usize, counter_index: usize) {
        let position = counter_index - offset;
        trace!(position, "dropped entry over capacity");
        self.record(CollisionCacheMetrics::record_drop);
        self.engine.shift_left(bucket, offset, position);
    }

    fn hit_existing(&self, counter_index: usize, entry: &EntryRef<K, V>) -> V {
        self.engine.counters().increment(counter_index);
        self.record(CollisionCacheMetrics::record_hit);
        entry.value().clone()
    }

    fn load_value<I, E>(
        &self,
        key: &K,
        load: impl FnOnce(&K) -> Result<Option<I>, E>,
    ) -> Result<Option<I>, E> {
        self.record(CollisionCacheMetrics::record_miss);
        let loaded = load(key)?;
        if loaded.is_some() {
            self.record(CollisionCacheMetrics::record_load);
        }
        Ok(loaded)
    }

    fn admitted(&self, counter_index: usize) {
        self.engine.counters().init_count(counter_index);
        self.size.fetch_add(1, Ordering::AcqRel);
        self.record(CollisionCacheMetrics::record_insertion);
    }

    fn reject(&self, value: V) -> V {
        trace!("over capacity, returning value uncached");
        self.record(CollisionCacheMetrics::record_uncached_load);
        value
    }
}

impl<K, L, V, S, R> SparseCollisionCache<K, L, V, S, R> {
    /// Number of cached entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Returns `true` if nothing is cached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target number of cached entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries per bucket.
    #[inline]
    pub fn max_collisions(&self) -> usize {
        self.engine.width()
    }

    /// Number of hash slots.
    #[inline]
    pub fn hash_table_len(&self) -> usize {
        self.engine.table_len()
    }

    /// Returns `true` if the cache refuses to overshoot its capacity.
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Event counters, when enabled through `record_metrics`.
    pub fn event_metrics(&self) -> Option<&CollisionCacheMetrics> {
        self.metrics.as_ref()
    }

    #[inline]
    fn is_over(&self) -> bool {
        self.size.load(Ordering::Acquire) > self.capacity
    }

    #[inline]
    fn record(&self, event: impl FnOnce(&CollisionCacheMetrics)) {
        if let Some(metrics) = &self.metrics {
            event(metrics);
        }
    }

    /// Takes one entry off the occupancy count if it is above capacity.
    fn release_over_capacity(&self) -> bool {
        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                (size > self.capacity).then(|| size - 1)
            })
            .is_ok()
    }

    fn release(&self, vacated: usize) {
        // The closure always returns `Some`, so the update cannot fail.
        let _ = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                Some(size.saturating_sub(vacated))
            });
    }
}

impl<K, L, V, S, R> SparseCollisionCache<K, L, V, S, R>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Sync,
    R: CounterRng,
{
    /// Empties every bucket, keeping the buckets allocated.
    pub fn clear(&self) {
        let _guard = self.sweep_lock.lock();
        let vacated = self.engine.sweep(false);
        self.release(vacated);
        debug!(vacated, "cleared collision cache");
    }

    /// Empties the cache and releases every bucket; they are allocated again
    /// on next use.
    pub fn null_buckets(&self) {
        let _guard = self.sweep_lock.lock();
        let vacated = self.engine.sweep(true);
        self.release(vacated);
        debug!(vacated, "released collision buckets");
    }
}

#[inline]
fn new_entry<K: Clone, V>(key: &K, value: V) -> EntryRef<K, V> {
    Arc::new(KeyVal::new(key.clone(), value))
}

impl<K, L, V, S, R> CacheMetrics for SparseCollisionCache<K, L, V, S, R> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self
            .metrics
            .as_ref()
            .map(CollisionCacheMetrics::to_btreemap)
            .unwrap_or_default();
        let size = self.len() as f64;
        let capacity = self.capacity as f64;
        metrics.insert(
            "allocated_buckets".to_string(),
            self.engine.allocated_buckets() as f64,
        );
        metrics.insert("capacity".to_string(), capacity);
        metrics.insert("size".to_string(), size);
        metrics.insert("utilization".to_string(), size / capacity);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "SparseCollision"
    }
}

impl<K, L, V, S, R> fmt::Display for SparseCollisionCache<K, L, V, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SparseCollisionCache {{ capacity: {}, strict_capacity: {}, size: {}, {} }}",
            self.capacity,
            self.strict,
            self.len(),
            self.engine
        )
    }
}

impl<K, L, V, S, R> fmt::Debug for SparseCollisionCache<K, L, V, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseCollisionCache")
            .field("capacity", &self.capacity)
            .field("strict_capacity", &self.strict)
            .field("size", &self.len())
            .field("max_collisions", &self.engine.width())
            .field("hash_table_len", &self.engine.table_len())
            .field("record_metrics", &self.metrics.is_some())
            .finish()
    }
}
