//! # MQTT Latency Benchmark Library
//!
//! A concurrent load generator for MQTT brokers. Each run starts N paired
//! publisher/subscriber clients, drives a fixed workload through every
//! publisher and measures how long the broker takes to forward each message
//! to the paired subscriber.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `benchmark`: Run configuration and the orchestrator that sequences workers
//! - `broker`: Client abstraction (`BrokerClient`) with MQTT and in-process
//!   loopback implementations
//! - `publisher` / `subscriber`: The two worker kinds
//! - `metrics`: Sample statistics (min/max/mean/sample standard deviation)
//! - `results`: Per-client records, cross-client rollups and output handling
//! - `cli`: Command-line interface parsing
//! - `utils`: Client ids, topic naming and formatting helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mqtt_latency_bench::{BenchmarkConfig, BenchmarkRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config =
//!         BenchmarkConfig::new("tcp://localhost:1883", "/test", 1, 100, 1000, 10, false)?;
//!
//!     let document = BenchmarkRunner::new(config).run().await?;
//!
//!     println!(
//!         "Forwarded {:.1}% with mean latency {:.3} ms",
//!         document.receive_totals.fwd_ratio * 100.0,
//!         document.receive_totals.fwd_latency_mean_avg
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Measurement Model
//!
//! - **Publish latency** is the time a publish call takes to complete at the
//!   configured QoS (socket write, PUBACK or PUBCOMP)
//! - **Forward latency** is the subscriber's receive time minus the send time
//!   embedded in the payload, so publisher and subscriber share one clock
//! - Totals use ratio-of-sums for success ratios and mean/sample standard
//!   deviation over per-client means for latencies

/// Run configuration and orchestration
///
/// Contains `BenchmarkConfig`, `BenchmarkRunner` and the `run_json` entry
/// point. The runner handles:
/// - The subscriber ready barrier before any publisher starts
/// - Result collection by count, independent of arrival order
/// - The quiescence window and per-subscriber stop signals
pub mod benchmark;

/// Broker client abstraction and implementations
///
/// Contains the `BrokerClient` trait, the wire payload (`Message`) and the
/// `ClientFactory` that picks an implementation per endpoint:
/// - `mqtt`: MQTT 3.1.1 over TCP using `rumqttc`
/// - `loopback`: in-process topic fan-out for dry runs and tests
pub mod broker;

/// Command-line interface and configuration
pub mod cli;

pub mod logging;

/// Statistical primitives shared by the workers and the rollups
pub mod metrics;

pub mod publisher;

/// Result records, rollups and output formatting
///
/// Field names of the serialized document are stable keys consumed by
/// downstream tooling.
pub mod results;

pub mod subscriber;

pub mod utils;

// Re-export key types for convenient library usage

/// Main benchmark execution engine
pub use benchmark::{run_json, BenchmarkConfig, BenchmarkRunner};

/// Broker abstraction and error types
pub use broker::{BrokerClient, BrokerEndpoint, BrokerError, ClientFactory, ConfigError, QoS};

/// Command-line interface types
pub use cli::{Args, OutputFormat};

/// Result collection and management
pub use results::{PublishTotals, ReceiveTotals, ResultDocument, ResultsManager};

/// The current version of the benchmark
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// The workload defaults describe a small smoke test against a local broker:
/// ten client pairs each sending one hundred 100-byte messages at QoS 1.
pub mod defaults {
    use std::time::Duration;

    /// Default broker address
    pub const BROKER: &str = "tcp://localhost:1883";

    /// Default topic prefix; client `i` uses `"/test-i"`
    pub const TOPIC: &str = "/test";

    /// Default QoS level
    pub const QOS: u8 = 1;

    /// Default payload filler size in bytes
    pub const PAYLOAD_SIZE: usize = 100;

    /// Default number of messages per publisher
    pub const MSG_COUNT: usize = 100;

    /// Default number of publisher/subscriber pairs
    pub const CLIENTS: usize = 10;

    /// Default MQTT keep-alive interval in seconds
    pub const KEEP_ALIVE_SECS: u64 = 60;

    /// Default drain window after the last publisher finishes
    pub const QUIESCENCE: Duration = Duration::from_secs(3);

    /// Prefix of generated MQTT client identifiers
    ///
    /// Kept short so `<prefix>-sub-<id>-<8 hex>` stays within the 23 bytes
    /// MQTT 3.1.1 brokers must accept, for ids up to 9999.
    pub const CLIENT_ID_PREFIX: &str = "mb";
}
