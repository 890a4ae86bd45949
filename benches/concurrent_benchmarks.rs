//! Concurrent Cache Benchmarks
//!
//! Multi-threaded reads over a warm cache, and a loading workload whose keys
//! follow a scrambled Zipf distribution so that hot keys are spread across
//! the whole table.

use collision_cache::{CollisionCacheBuilder, SparseCollisionCache};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hash::{BuildHasher, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

const CACHE_SIZE: usize = 1 << 14;
const OPS_PER_THREAD: usize = 1_000;
const ZIPF_ITEMS: u64 = (CACHE_SIZE as u64) * 8;
const ZIPF_THETA: f64 = 0.99;

type Cache = SparseCollisionCache<u64, u64, u64>;

fn make_cache(strict: bool) -> Cache {
    CollisionCacheBuilder::new(NonZeroUsize::new(CACHE_SIZE).unwrap())
        .strict_capacity(strict)
        .build_loading(|key: &u64| Some(punish_miss(*key)), |_, value: u64| value)
        .unwrap()
}

/// A little arithmetic so that a miss costs more than a hit.
fn punish_miss(key: u64) -> u64 {
    (key as f64).powi(3).cbrt().round() as u64
}

/// Zipf keys drawn by inverting the cumulative distribution, then scattered
/// over the key space with a hash so popularity does not follow key order.
fn scrambled_zipf_keys(count: usize, seed: u64) -> Vec<u64> {
    let mut cumulative = Vec::with_capacity(ZIPF_ITEMS as usize);
    let mut total = 0.0;
    for rank in 1..=ZIPF_ITEMS {
        total += 1.0 / (rank as f64).powf(ZIPF_THETA);
        cumulative.push(total);
    }
    let scramble = std::collections::hash_map::RandomState::new();
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let target = rng.gen::<f64>() * total;
            let rank = cumulative.partition_point(|&weight| weight < target) as u64;
            let mut hasher = scramble.build_hasher();
            hasher.write_u64(rank);
            hasher.finish() % ZIPF_ITEMS
        })
        .collect()
}

/// Benchmark concurrent reads of a warm cache
fn concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Reads");

    let cache = Arc::new(make_cache(false));
    for i in 0..CACHE_SIZE as u64 {
        cache.get(&i);
    }

    for threads in [1, 2, 4, 8] {
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::new("get_if_present", threads), &threads, |b, &n| {
            b.iter(|| run_concurrent(Arc::clone(&cache), n, |cache, t, i| {
                let key = ((t * OPS_PER_THREAD + i) % CACHE_SIZE) as u64;
                black_box(cache.get_if_present(&key));
            }));
        });
    }

    group.finish();
}

/// Benchmark the loading path under a scrambled Zipf workload
fn concurrent_zipf_loading(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Zipf Loading");
    let keys = Arc::new(scrambled_zipf_keys(1 << 16, 42));
    const THREADS: usize = 8;
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    for (name, strict, aggressive) in [
        ("get lenient", false, false),
        ("get strict", true, false),
        ("get_aggressive", false, true),
    ] {
        let cache = Arc::new(make_cache(strict));
        for key in keys.iter() {
            cache.get(key);
        }
        group.bench_function(name, |b| {
            b.iter(|| {
                let keys = Arc::clone(&keys);
                run_concurrent(Arc::clone(&cache), THREADS, move |cache, t, i| {
                    let key = keys[(t * 7919 + i) % keys.len()];
                    let value = if aggressive {
                        cache.get_aggressive(&key)
                    } else {
                        cache.get(&key)
                    };
                    black_box(value);
                });
            });
        });
    }

    group.finish();
}

/// Benchmark mixed loads, puts and removals (80% reads, 20% writes)
fn concurrent_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Mixed");
    group.throughput(Throughput::Elements((8 * OPS_PER_THREAD) as u64));

    let cache = Arc::new(make_cache(false));
    group.bench_function("80/20", |b| {
        b.iter(|| run_concurrent(Arc::clone(&cache), 8, |cache, t, i| {
            let key = ((t * OPS_PER_THREAD + i) % (CACHE_SIZE * 2)) as u64;
            match i % 10 {
                0 => {
                    black_box(cache.put_replace(key, key));
                }
                1 => {
                    black_box(cache.remove(&key));
                }
                _ => {
                    black_box(cache.get(&key));
                }
            }
        }));
    });

    group.finish();
}

fn run_concurrent<F>(cache: Arc<Cache>, num_threads: usize, op: F)
where
    F: Fn(&Cache, usize, usize) + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = Arc::clone(&cache);
        let op = Arc::clone(&op);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                op(&cache, t, i);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

criterion_group!(
    benches,
    concurrent_reads,
    concurrent_zipf_loading,
    concurrent_mixed
);
criterion_main!(benches);
