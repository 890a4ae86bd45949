use clap::Parser;
use std::path::PathBuf;

mod models;
mod runner;
mod stats;
mod zipf;

use models::{BenchConfig, CacheAlgorithm};
use runner::Runner;
use stats::BenchStats;

/// Compares the collision cache with moka and lru on a scrambled Zipf workload
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache capacity (number of entries)
    #[arg(short, long, default_value = "10000")]
    capacity: usize,

    /// Number of distinct keys in the workload
    #[arg(long, default_value = "1000000")]
    items: u64,

    /// Zipf skew, between 0 and 1 exclusive
    #[arg(long, default_value_t = zipf::DEFAULT_THETA)]
    theta: f64,

    /// Number of worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Requests issued by each thread
    #[arg(short, long, default_value = "1000000")]
    requests: usize,

    /// Seed for the key streams
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Algorithms to run (collision, collision-strict, collision-aggressive, moka, lru)
    /// If not provided, all algorithms will be used
    #[arg(short, long, value_name = "ALGOS", num_args = 1.., value_delimiter = ',')]
    algorithms: Option<Vec<CacheAlgorithm>>,

    /// Export results to CSV file
    #[arg(long, value_name = "PATH")]
    output_csv: Option<PathBuf>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    if args.items < 2 {
        return Err("--items must be at least 2".into());
    }
    if !(args.theta > 0.0 && args.theta < 1.0) {
        return Err("--theta must be between 0 and 1 exclusive".into());
    }

    let algorithms = args.algorithms.unwrap_or_else(CacheAlgorithm::all);
    let config = BenchConfig {
        capacity: args.capacity,
        items: args.items,
        theta: args.theta,
        threads: args.threads,
        requests_per_thread: args.requests,
        seed: args.seed,
    };

    println!("Collision Cache Benchmark");
    println!("=========================");
    println!("Capacity: {}", config.capacity);
    println!("Items: {}", config.items);
    println!("Theta: {}", config.theta);
    println!("Threads: {}", config.threads);
    println!("Requests per thread: {}", config.requests_per_thread);
    println!(
        "Algorithms: {}",
        algorithms
            .iter()
            .map(CacheAlgorithm::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let runner = Runner::new(config);
    let mut stats = BenchStats::new(runner.config().clone());
    for algorithm in algorithms {
        stats.record(runner.run(algorithm)?);
    }

    stats.print_summary();
    if let Some(path) = args.output_csv {
        stats.export_csv(&path)?;
    }
    Ok(())
}
