// Result reporting for benchmark runs

use crate::models::{BenchConfig, CsvResultRow, RunResult};
use std::path::Path;

/// Collects the results of every run against one workload
pub struct BenchStats {
    config: BenchConfig,
    results: Vec<RunResult>,
}

impl BenchStats {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: RunResult) {
        self.results.push(result);
    }

    /// Print a summary table of the results, best hit rate first
    pub fn print_summary(&self) {
        let config = &self.config;
        println!("\nCollision Cache Benchmark Summary");
        println!("=================================");
        println!(
            "capacity: {}  items: {}  theta: {}  threads: {}  requests/thread: {}",
            config.capacity, config.items, config.theta, config.threads, config.requests_per_thread
        );
        println!();
        println!(
            "{:<22} {:>10} {:>10} {:>9} {:>10} {:>10} {:>14}",
            "Algorithm", "Requests", "Loads", "Hit %", "Final Len", "Time (ms)", "Ops/sec"
        );
        println!("{}", "-".repeat(91));

        let mut sorted: Vec<&RunResult> = self.results.iter().collect();
        sorted.sort_by(|a, b| b.hit_rate().total_cmp(&a.hit_rate()));
        for result in sorted {
            println!(
                "{:<22} {:>10} {:>10} {:>8.2}% {:>10} {:>10} {:>14.0}",
                result.algorithm.as_str(),
                result.requests,
                result.loads,
                result.hit_rate(),
                result.final_len,
                result.elapsed.as_millis(),
                result.ops_per_sec()
            );
        }
    }

    /// Export results to CSV, one row per run
    pub fn export_csv(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = csv::Writer::from_path(path)?;
        for result in &self.results {
            writer.serialize(CsvResultRow::new(&self.config, result))?;
        }
        writer.flush()?;
        println!("\nResults exported to: {}", path.display());
        Ok(())
    }
}
