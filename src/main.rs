//! # MQTT Latency Benchmark - Main Entry Point
//!
//! The main function performs these key operations:
//! 1. **Parse arguments**: Processes command-line configuration
//! 2. **Initialize logging**: Colorized stderr output or a log file
//! 3. **Create benchmark config**: Converts CLI args to the resolved configuration
//! 4. **Run the benchmark**: Subscribers, publishers, quiescence, rollup
//! 5. **Write results**: JSON document or text tables to stdout or `--output`
//!
//! Configuration errors exit non-zero before any client connects. Broker
//! failures during the run only appear as counters in the results.

use anyhow::Result;
use clap::Parser;
use mqtt_latency_bench::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    cli::Args,
    logging::init_logging,
    results::ResultsManager,
};
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the non-blocking file writer flushes.
    let _log_guard = init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    let config = match BenchmarkConfig::from_args(&args).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let document = BenchmarkRunner::new(config).run().await?;

    ResultsManager::new(args.output.as_deref(), args.format).write(&document)?;
    Ok(())
}
