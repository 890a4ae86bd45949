use collision_cache::{CollisionCacheBuilder, SparseCollisionCache};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::num::NonZeroUsize;

const CACHE_SIZE: usize = 1000;

fn make_cache(cap: usize, strict: bool) -> SparseCollisionCache<usize, usize, usize> {
    CollisionCacheBuilder::new(NonZeroUsize::new(cap).unwrap())
        .strict_capacity(strict)
        .build_loading(|key: &usize| Some(*key), |_, value: usize| value)
        .unwrap()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cache Operations");

    {
        let cache = make_cache(CACHE_SIZE, false);
        for i in 0..CACHE_SIZE {
            cache.put_if_absent(i, i);
        }

        group.bench_function("get_if_present hit", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.get_if_present(&(i % CACHE_SIZE)));
                }
            });
        });

        group.bench_function("get_if_present miss", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.get_if_present(&(i + 10 * CACHE_SIZE)));
                }
            });
        });

        group.bench_function("get hit", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.get(&(i % CACHE_SIZE)));
                }
            });
        });
    }

    for (name, strict) in [("get miss lenient", false), ("get miss strict", true)] {
        let cache = make_cache(CACHE_SIZE, strict);
        let mut next = 0usize;
        group.bench_function(name, |b| {
            b.iter(|| {
                for _ in 0..100 {
                    next = next.wrapping_add(1);
                    black_box(cache.get(&next));
                }
            });
        });
    }

    {
        let cache = make_cache(CACHE_SIZE, false);
        let mut next = 0usize;
        group.bench_function("get_aggressive miss", |b| {
            b.iter(|| {
                for _ in 0..100 {
                    next = next.wrapping_add(1);
                    black_box(cache.get_aggressive(&next));
                }
            });
        });
    }

    {
        let cache = make_cache(CACHE_SIZE, false);
        for i in 0..CACHE_SIZE {
            cache.put_if_absent(i, i);
        }

        group.bench_function("put_replace existing", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.put_replace(i % CACHE_SIZE, i));
                }
            });
        });

        group.bench_function("put_if_absent existing", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.put_if_absent(i % CACHE_SIZE, i));
                }
            });
        });

        group.bench_function("replace existing", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.replace(i % CACHE_SIZE, i));
                }
            });
        });

        let mut next = CACHE_SIZE;
        group.bench_function("put_replace evicting", |b| {
            b.iter(|| {
                for _ in 0..100 {
                    next += 1;
                    black_box(cache.put_replace(next, next));
                }
            });
        });
    }

    {
        let cache = make_cache(CACHE_SIZE, false);
        group.bench_function("put_if_space then remove", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(cache.put_if_space_absent(i, i));
                }
                for i in 0..100 {
                    black_box(cache.remove(&i));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
