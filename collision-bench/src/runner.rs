//! Workload runner
//!
//! Every cache gets the same pre-drawn key streams, one per worker thread,
//! so that only the cache differs between runs. A request is a read that
//! loads and caches the value on a miss; the loader bumps a shared counter
//! so hit rates are measured the same way for every implementation.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use ahash::RandomState as AHashRandomState;
use collision_cache::{CacheMetrics, CollisionCacheBuilder, SparseCollisionCache};
use lru::LruCache;
use moka::sync::Cache as MokaCache;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::models::{BenchConfig, CacheAlgorithm, RunResult};
use crate::zipf::ScrambledZipf;

type CollisionCache = SparseCollisionCache<u64, u64, u64>;

/// Wrapper enum for every cache under test
enum CacheWrapper {
    Collision(CollisionCache),
    CollisionAggressive(CollisionCache),
    Moka(MokaCache<u64, u64, AHashRandomState>),
    Lru(Mutex<LruCache<u64, u64>>),
}

impl CacheWrapper {
    fn new(
        algorithm: CacheAlgorithm,
        capacity: NonZeroUsize,
        loads: &Arc<AtomicU64>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let collision = |strict: bool| {
            let loads = Arc::clone(loads);
            CollisionCacheBuilder::new(capacity)
                .strict_capacity(strict)
                .record_metrics(true)
                .build_loading(
                    move |key: &u64| {
                        loads.fetch_add(1, Ordering::Relaxed);
                        Some(load_value(*key))
                    },
                    |_, value: u64| value,
                )
        };
        Ok(match algorithm {
            CacheAlgorithm::Collision => CacheWrapper::Collision(collision(false)?),
            CacheAlgorithm::CollisionStrict => CacheWrapper::Collision(collision(true)?),
            CacheAlgorithm::CollisionAggressive => {
                CacheWrapper::CollisionAggressive(collision(false)?)
            }
            CacheAlgorithm::Moka => CacheWrapper::Moka(
                MokaCache::builder()
                    .max_capacity(capacity.get() as u64)
                    .build_with_hasher(AHashRandomState::new()),
            ),
            CacheAlgorithm::Lru => CacheWrapper::Lru(Mutex::new(LruCache::new(capacity))),
        })
    }

    /// Reads `key`, loading it on a miss.
    fn request(&self, key: u64, loads: &AtomicU64) -> u64 {
        match self {
            CacheWrapper::Collision(cache) => cache.get(&key).unwrap_or_default(),
            CacheWrapper::CollisionAggressive(cache) => {
                cache.get_aggressive(&key).unwrap_or_default()
            }
            CacheWrapper::Moka(cache) => cache.get_with(key, || {
                loads.fetch_add(1, Ordering::Relaxed);
                load_value(key)
            }),
            CacheWrapper::Lru(cache) => {
                let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(value) = cache.get(&key) {
                    return *value;
                }
                loads.fetch_add(1, Ordering::Relaxed);
                let value = load_value(key);
                cache.put(key, value);
                value
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            CacheWrapper::Collision(cache) | CacheWrapper::CollisionAggressive(cache) => {
                cache.len()
            }
            CacheWrapper::Moka(cache) => {
                cache.run_pending_tasks();
                cache.entry_count() as usize
            }
            CacheWrapper::Lru(cache) => cache.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    fn log_internals(&self) {
        if let CacheWrapper::Collision(cache) | CacheWrapper::CollisionAggressive(cache) = self {
            debug!(algorithm = cache.algorithm_name(), metrics = ?cache.metrics(), "{}", cache);
        }
    }
}

/// A little arithmetic so that a miss costs more than a hit.
fn load_value(key: u64) -> u64 {
    (key as f64).powi(3).cbrt().round() as u64
}

/// Drives caches with a fixed scrambled Zipf workload.
pub struct Runner {
    config: BenchConfig,
    streams: Vec<Arc<Vec<u64>>>,
}

impl Runner {
    pub fn new(config: BenchConfig) -> Self {
        let zipf = ScrambledZipf::new(config.items, config.theta);
        let streams = (0..config.threads)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let keys = (0..config.requests_per_thread)
                    .map(|_| zipf.next_key(&mut rng))
                    .collect();
                Arc::new(keys)
            })
            .collect();
        debug!(
            threads = config.threads,
            requests_per_thread = config.requests_per_thread,
            items = config.items,
            theta = config.theta,
            "generated key streams"
        );
        Self { config, streams }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn run(&self, algorithm: CacheAlgorithm) -> Result<RunResult, Box<dyn std::error::Error>> {
        let capacity = NonZeroUsize::new(self.config.capacity).ok_or("capacity must be non-zero")?;
        let loads = Arc::new(AtomicU64::new(0));
        let cache = CacheWrapper::new(algorithm, capacity, &loads)?;
        info!(algorithm = algorithm.as_str(), threads = self.config.threads, "starting run");

        let start = Instant::now();
        thread::scope(|scope| {
            for keys in &self.streams {
                let cache = &cache;
                let loads = &loads;
                scope.spawn(move || {
                    let mut checksum = 0u64;
                    for &key in keys.iter() {
                        checksum = checksum.wrapping_add(cache.request(key, loads));
                    }
                    std::hint::black_box(checksum);
                });
            }
        });
        let elapsed = start.elapsed();

        cache.log_internals();
        let result = RunResult {
            algorithm,
            threads: self.config.threads,
            requests: (self.config.threads * self.config.requests_per_thread) as u64,
            loads: loads.load(Ordering::Relaxed),
            final_len: cache.len(),
            elapsed,
        };
        info!(
            algorithm = algorithm.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            hit_rate = result.hit_rate(),
            "finished run"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(threads: usize) -> BenchConfig {
        BenchConfig {
            capacity: 256,
            items: 4_096,
            theta: 0.99,
            threads,
            requests_per_thread: 2_000,
            seed: 11,
        }
    }

    #[test]
    fn test_every_algorithm_completes() {
        let runner = Runner::new(small_config(2));
        for algo in CacheAlgorithm::all() {
            let result = runner.run(algo).unwrap();
            assert_eq!(result.requests, 4_000);
            assert!(result.loads > 0, "{} never loaded", algo);
            assert!(result.loads <= result.requests);
            assert!(result.final_len > 0);
        }
    }

    #[test]
    fn test_skewed_workload_hits() {
        let runner = Runner::new(small_config(1));
        let result = runner.run(CacheAlgorithm::Collision).unwrap();
        // The hottest few keys alone draw a large share of requests.
        assert!(result.hit_rate() > 20.0, "hit rate {}", result.hit_rate());
    }

    #[test]
    fn test_streams_are_reproducible() {
        let a = Runner::new(small_config(2));
        let b = Runner::new(small_config(2));
        assert_eq!(a.streams, b.streams);
        assert_ne!(a.streams[0], a.streams[1]);
    }

    #[test]
    fn test_load_value_is_identity() {
        for key in [0, 1, 17, 1_000, 65_535] {
            assert_eq!(load_value(key), key);
        }
    }
}
