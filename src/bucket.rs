//! Collision Buckets and the Bucket Table
//!
//! The hash table is an array of lazily allocated buckets. A bucket is a
//! fixed-length array of entry cells plus the reentrant mutex guarding its
//! slow path.
//!
//! ```text
//!   table (power-of-two length)
//! ┌──────┬──────┬──────┬──────┐
//! │  ──┐ │ None │  ──┐ │ None │      ArcSwapOption<Bucket>
//! └────┼─┴──────┴────┼─┴──────┘
//!      ▼             ▼
//!   ┌────┬────┬────┬────┐   ReentrantMutex<()>   slow path only
//!   │ kv │ kv │ -- │ -- │   ArcSwapOption<KeyVal> per position
//!   └────┴────┴────┴────┘
//! ```
//!
//! All memory ordering for entries and buckets lives here. Cells are
//! `arc_swap::ArcSwapOption`: loads never block and observe a fully built
//! value, stores publish with release semantics, and compare-and-swap compares
//! pointer identity. Readers holding a loaded entry keep it alive after it has
//! been swapped out, so replacement never frees memory under a reader.

use std::sync::Arc;
use std::thread;

use arc_swap::{ArcSwapOption, Guard};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::entry::KeyVal;

/// Tables at least this long are swept by several threads.
const PARALLEL_SWEEP_THRESHOLD: usize = 4096;

pub(crate) type EntryRef<K, V> = Arc<KeyVal<K, V>>;

/// A fixed-size array of entry cells sharing one hash slot.
pub(crate) struct Bucket<K, V> {
    slots: Box<[ArcSwapOption<KeyVal<K, V>>]>,
    lock: ReentrantMutex<()>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) fn new(width: usize) -> Self {
        Self {
            slots: (0..width).map(|_| ArcSwapOption::empty()).collect(),
            lock: ReentrantMutex::new(()),
        }
    }

    #[inline]
    pub(crate) fn width(&self) -> usize {
        self.slots.len()
    }

    /// Acquires the bucket's slow-path lock. Lock-free readers and inserters
    /// never take it. The owning thread may take it again, so a loader
    /// running under the lock can read other keys of the same bucket.
    #[inline]
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    #[inline]
    pub(crate) fn load(&self, index: usize) -> Guard<Option<EntryRef<K, V>>> {
        self.slots[index].load()
    }

    #[inline]
    pub(crate) fn load_full(&self, index: usize) -> Option<EntryRef<K, V>> {
        self.slots[index].load_full()
    }

    #[inline]
    pub(crate) fn store(&self, index: usize, entry: Option<EntryRef<K, V>>) {
        self.slots[index].store(entry);
    }

    #[inline]
    pub(crate) fn take(&self, index: usize) -> Option<EntryRef<K, V>> {
        self.slots[index].swap(None)
    }

    /// Installs `entry` at `index` if the position is empty. On failure
    /// returns the entry that occupies it.
    pub(crate) fn insert_if_empty(
        &self,
        index: usize,
        entry: &EntryRef<K, V>,
    ) -> Result<(), EntryRef<K, V>> {
        let witness =
            self.slots[index].compare_and_swap(&None::<EntryRef<K, V>>, Some(Arc::clone(entry)));
        match &*witness {
            None => Ok(()),
            Some(occupant) => Err(Arc::clone(occupant)),
        }
    }

    /// Replaces `current` at `index` with `new`. On failure returns whatever
    /// occupies the position now.
    pub(crate) fn compare_exchange(
        &self,
        index: usize,
        current: &EntryRef<K, V>,
        new: EntryRef<K, V>,
    ) -> Result<(), Option<EntryRef<K, V>>> {
        let witness = self.slots[index].compare_and_swap(current, Some(new));
        match &*witness {
            Some(previous) if Arc::ptr_eq(previous, current) => Ok(()),
            other => Err(other.clone()),
        }
    }

    /// Number of occupied positions.
    pub(crate) fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.load().is_some()).count()
    }

    /// Returns `true` if the occupied positions form a prefix.
    pub(crate) fn is_compact(&self) -> bool {
        let mut seen_empty = false;
        for slot in self.slots.iter() {
            match (slot.load().is_some(), seen_empty) {
                (true, true) => return false,
                (false, _) => seen_empty = true,
                (true, false) => {}
            }
        }
        true
    }
}

/// The top-level array of lazily created buckets.
pub(crate) struct BucketTable<K, V> {
    buckets: Box<[ArcSwapOption<Bucket<K, V>>]>,
    width: usize,
}

impl<K, V> BucketTable<K, V> {
    pub(crate) fn new(len: usize, width: usize) -> Self {
        Self {
            buckets: (0..len).map(|_| ArcSwapOption::empty()).collect(),
            width,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Runs `f` against the bucket at `slot`, creating the bucket first if the
    /// slot is empty.
    ///
    /// Creation is a single compare-and-swap from empty: every racer ends up
    /// with the same bucket and losing allocations are dropped.
    pub(crate) fn with_bucket<T>(&self, slot: usize, f: impl FnOnce(&Bucket<K, V>) -> T) -> T {
        let cell = &self.buckets[slot];
        let current = cell.load();
        if let Some(bucket) = current.as_deref() {
            return f(bucket);
        }
        drop(current);

        let fresh = Arc::new(Bucket::new(self.width));
        let witness = cell.compare_and_swap(&None::<Arc<Bucket<K, V>>>, Some(Arc::clone(&fresh)));
        match witness.as_deref() {
            Some(winner) => f(winner),
            None => f(&fresh),
        }
    }

    /// Runs `f` against the bucket at `slot` if it exists.
    #[inline]
    pub(crate) fn with_existing<T>(
        &self,
        slot: usize,
        f: impl FnOnce(&Bucket<K, V>) -> Option<T>,
    ) -> Option<T> {
        self.buckets[slot].load().as_deref().and_then(f)
    }

    /// Returns the bucket at `slot` without creating it.
    pub(crate) fn bucket(&self, slot: usize) -> Option<Arc<Bucket<K, V>>> {
        self.buckets[slot].load_full()
    }

    /// Detaches the bucket at `slot`; the next access allocates a new one.
    pub(crate) fn detach(&self, slot: usize) -> Option<Arc<Bucket<K, V>>> {
        self.buckets[slot].swap(None)
    }

    /// Number of slots that currently own a bucket.
    pub(crate) fn allocated(&self) -> usize {
        self.buckets
            .iter()
            .filter(|bucket| bucket.load().is_some())
            .count()
    }
}

impl<K: Send + Sync, V: Send + Sync> BucketTable<K, V> {
    /// Calls `f` for every slot index and sums the results. Large tables are
    /// split into one contiguous chunk per available core; no slot depends on
    /// another.
    pub(crate) fn sweep<F>(&self, f: F) -> usize
    where
        F: Fn(usize) -> usize + Sync,
    {
        let len = self.buckets.len();
        let threads = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1);
        if len < PARALLEL_SWEEP_THRESHOLD || threads == 1 {
            return (0..len).map(&f).sum();
        }

        let chunk = len.div_ceil(threads);
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..len)
                .step_by(chunk)
                .map(|start| {
                    let end = (start + chunk).min(len);
                    scope.spawn(move || (start..end).map(f).sum::<usize>())
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(swept) => swept,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .sum()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn entry(key: u64, value: u64) -> EntryRef<u64, u64> {
        Arc::new(KeyVal::new(key, value))
    }

    #[test]
    fn test_insert_if_empty() {
        let bucket: Bucket<u64, u64> = Bucket::new(4);
        assert_eq!(bucket.width(), 4);
        let first = entry(1, 10);
        assert!(bucket.insert_if_empty(0, &first).is_ok());

        let second = entry(2, 20);
        let occupant = bucket.insert_if_empty(0, &second).unwrap_err();
        assert!(Arc::ptr_eq(&occupant, &first));
        assert_eq!(bucket.occupied(), 1);
    }

    #[test]
    fn test_compare_exchange() {
        let bucket: Bucket<u64, u64> = Bucket::new(2);
        let original = entry(1, 10);
        bucket.insert_if_empty(0, &original).unwrap();

        let replacement = entry(1, 11);
        assert!(bucket
            .compare_exchange(0, &original, Arc::clone(&replacement))
            .is_ok());

        // The stale expectation no longer matches.
        let witness = bucket
            .compare_exchange(0, &original, entry(1, 12))
            .unwrap_err()
            .unwrap();
        assert!(Arc::ptr_eq(&witness, &replacement));
        assert_eq!(*bucket.load_full(0).unwrap().value(), 11);
    }

    #[test]
    fn test_is_compact() {
        let bucket: Bucket<u64, u64> = Bucket::new(4);
        assert!(bucket.is_compact());
        bucket.store(0, Some(entry(1, 1)));
        bucket.store(1, Some(entry(2, 2)));
        assert!(bucket.is_compact());
        bucket.store(3, Some(entry(4, 4)));
        assert!(!bucket.is_compact());
        assert_eq!(bucket.take(3).map(|e| *e.key()), Some(4));
        assert!(bucket.is_compact());
    }

    #[test]
    fn test_lazy_creation_single_winner() {
        let table: Arc<BucketTable<u64, u64>> = Arc::new(BucketTable::new(8, 4));
        assert_eq!(table.allocated(), 0);

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads as u64)
            .map(|t| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    table.with_bucket(3, |bucket| {
                        let _ = bucket.insert_if_empty(0, &entry(t, t));
                        bucket as *const Bucket<u64, u64> as usize
                    })
                })
            })
            .collect();
        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.allocated(), 1);
        assert_eq!(table.bucket(3).unwrap().occupied(), 1);
    }

    #[test]
    fn test_detach_forces_reallocation() {
        let table: BucketTable<u64, u64> = BucketTable::new(4, 2);
        table.with_bucket(1, |bucket| bucket.store(0, Some(entry(1, 1))));
        let detached = table.detach(1).unwrap();
        assert_eq!(detached.occupied(), 1);
        assert!(table.bucket(1).is_none());
        let occupied = table.with_bucket(1, |bucket| bucket.occupied());
        assert_eq!(occupied, 0);
    }

    #[test]
    fn test_sweep_visits_every_slot() {
        for len in [16, PARALLEL_SWEEP_THRESHOLD * 2] {
            let table: BucketTable<u64, u64> = BucketTable::new(len, 2);
            let visited = table.sweep(|_| 1);
            assert_eq!(visited, len);
            let sum = table.sweep(|slot| slot);
            assert_eq!(sum, len * (len - 1) / 2);
        }
    }
}
