// Data models for the benchmark runs

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Cache implementations that can be driven by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheAlgorithm {
    /// Collision cache, `get`, lenient capacity
    Collision,
    /// Collision cache, `get`, strict capacity
    CollisionStrict,
    /// Collision cache, `get_aggressive`
    CollisionAggressive,
    /// Moka cache (external crate for comparison)
    Moka,
    /// `lru::LruCache` behind a mutex
    Lru,
}

impl CacheAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheAlgorithm::Collision => "collision",
            CacheAlgorithm::CollisionStrict => "collision-strict",
            CacheAlgorithm::CollisionAggressive => "collision-aggressive",
            CacheAlgorithm::Moka => "moka",
            CacheAlgorithm::Lru => "lru",
        }
    }

    /// Get all available algorithms
    pub fn all() -> Vec<CacheAlgorithm> {
        vec![
            CacheAlgorithm::Collision,
            CacheAlgorithm::CollisionStrict,
            CacheAlgorithm::CollisionAggressive,
            CacheAlgorithm::Moka,
            CacheAlgorithm::Lru,
        ]
    }
}

impl fmt::Display for CacheAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheAlgorithm::all()
            .into_iter()
            .find(|algo| algo.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown algorithm: {}", s))
    }
}

/// Workload parameters shared by every run
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub capacity: usize,
    pub items: u64,
    pub theta: f64,
    pub threads: usize,
    pub requests_per_thread: usize,
    pub seed: u64,
}

/// Outcome of driving one cache with the workload
#[derive(Debug, Clone)]
pub struct RunResult {
    pub algorithm: CacheAlgorithm,
    pub threads: usize,
    pub requests: u64,
    pub loads: u64,
    pub final_len: usize,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn hits(&self) -> u64 {
        self.requests.saturating_sub(self.loads)
    }

    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits() as f64 / self.requests as f64 * 100.0
        }
    }

    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.requests as f64 / secs
        }
    }
}

/// CSV row for results export
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub algorithm: String,
    pub threads: usize,
    pub capacity: usize,
    pub items: u64,
    pub theta: f64,
    pub requests: u64,
    pub hits: u64,
    pub loads: u64,
    pub hit_rate: f64,
    pub final_len: usize,
    pub elapsed_ms: u128,
    pub ops_per_sec: f64,
}

impl CsvResultRow {
    pub fn new(config: &BenchConfig, result: &RunResult) -> Self {
        Self {
            algorithm: result.algorithm.as_str().to_string(),
            threads: result.threads,
            capacity: config.capacity,
            items: config.items,
            theta: config.theta,
            requests: result.requests,
            hits: result.hits(),
            loads: result.loads,
            hit_rate: result.hit_rate(),
            final_len: result.final_len,
            elapsed_ms: result.elapsed.as_millis(),
            ops_per_sec: result.ops_per_sec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names_round_trip() {
        for algo in CacheAlgorithm::all() {
            assert_eq!(algo.as_str().parse::<CacheAlgorithm>(), Ok(algo));
        }
        assert_eq!(" Moka ".parse::<CacheAlgorithm>(), Ok(CacheAlgorithm::Moka));
        assert!("lfu".parse::<CacheAlgorithm>().is_err());
    }

    #[test]
    fn test_hit_rate() {
        let result = RunResult {
            algorithm: CacheAlgorithm::Collision,
            threads: 1,
            requests: 200,
            loads: 50,
            final_len: 40,
            elapsed: Duration::from_millis(100),
        };
        assert_eq!(result.hits(), 150);
        assert!((result.hit_rate() - 75.0).abs() < 1e-9);
        assert!((result.ops_per_sec() - 2_000.0).abs() < 1e-6);
    }
}
