//! # Benchmark Engine Module
//!
//! This module contains the orchestrator that drives one benchmark run: it
//! starts paired subscriber and publisher workers against a broker, collects
//! their reports and hands them to the rollup code in `results`.
//!
//! ## Key Components
//!
//! - **BenchmarkConfig**: Fully-resolved run parameters; never parses arguments itself
//! - **BenchmarkRunner**: Sequences the worker lifecycle and assembles the result document
//! - **run_json**: One-call entry point returning the serialized document
//!
//! ## Run Lifecycle
//!
//! 1. **Validation**: Configuration errors abort before any worker starts
//! 2. **Subscribe**: One subscriber per client; the run waits until all are ready
//! 3. **Publish**: One publisher per client, all started together
//! 4. **Quiescence**: A drain window lets in-flight messages arrive
//! 5. **Stop**: Each subscriber gets its own stop signal and reports
//! 6. **Rollup**: Results are matched by client id and aggregated
//!
//! Worker failures never abort a run. Connection, publish and subscribe errors
//! only show up as counters in the document.

use crate::{
    broker::{BrokerEndpoint, ClientFactory, ConfigError, ConnectOptions, QoS},
    cli::Args,
    publisher::{Publisher, PublisherSpec},
    results::{PublisherResult, ResultDocument, SubscriberReport},
    subscriber::{Subscriber, SubscriberChannels, SubscriberSpec},
    utils::{format_duration, generate_client_id, worker_topic, ClientRole},
};
use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Bytes the encoded payload carries on top of the filler
const PAYLOAD_ENVELOPE: usize = 64;

/// Single source of truth for displaying the run configuration
struct BenchmarkConfigDisplay<'a> {
    config: &'a BenchmarkConfig,
}

impl<'a> std::fmt::Display for BenchmarkConfigDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config;
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting Benchmark against: {}", config.broker)?;
        writeln!(f, "  Clients:            {}", config.clients)?;
        writeln!(f, "  Topic Prefix:       {}", config.topic_prefix)?;
        writeln!(f, "  QoS:                {}", config.qos.level())?;
        writeln!(f, "  Payload Size:       {} bytes", config.payload_size)?;
        writeln!(f, "  Message Count:      {} per client", config.msg_count)?;
        writeln!(f, "  Keep Alive:         {:?}", config.keep_alive)?;
        writeln!(
            f,
            "  Quiescence:         {}",
            format_duration(config.quiescence)
        )?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Configuration for one benchmark run
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    /// Broker every worker connects to
    pub broker: BrokerEndpoint,

    /// Client `i` publishes and subscribes on `"<topic_prefix>-<i>"`
    pub topic_prefix: String,

    /// QoS used for both publishing and subscribing
    pub qos: QoS,

    /// Filler bytes per message
    pub payload_size: usize,

    /// Messages each publisher sends
    pub msg_count: usize,

    /// Number of publisher/subscriber pairs
    pub clients: usize,

    /// Suppress progress logging
    pub quiet: bool,

    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Drain window between publisher completion and stopping subscribers
    ///
    /// Messages still in flight when it ends are lost from the received count.
    pub quiescence: Duration,
}

impl BenchmarkConfig {
    /// Create a configuration with default keep-alive, credentials and quiescence
    ///
    /// ## Errors
    /// - `ConfigError::InvalidBrokerAddress` for an unparseable broker address
    /// - `ConfigError::InvalidQos` for a level outside 0..=2
    ///
    /// The client count is checked by `validate`, which every run calls first.
    pub fn new(
        broker: &str,
        topic_prefix: &str,
        qos: u8,
        payload_size: usize,
        msg_count: usize,
        clients: usize,
        quiet: bool,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            broker: BrokerEndpoint::parse(broker)?,
            topic_prefix: topic_prefix.to_string(),
            qos: QoS::try_from(qos)?,
            payload_size,
            msg_count,
            clients,
            quiet,
            keep_alive: Duration::from_secs(crate::defaults::KEEP_ALIVE_SECS),
            username: None,
            password: None,
            quiescence: crate::defaults::QUIESCENCE,
        })
    }

    /// Create benchmark configuration from CLI arguments
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Self::new(
            &args.broker,
            &args.topic,
            args.qos,
            args.size,
            args.count,
            args.clients,
            args.quiet,
        )?;
        config.keep_alive = Duration::from_secs(args.keep_alive);
        config.username = args.username.clone();
        config.password = args.password.clone();
        config.quiescence = args.quiescence;
        Ok(config)
    }

    /// Reject configurations that cannot produce a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients < 1 {
            return Err(ConfigError::InvalidClientCount(self.clients));
        }
        Ok(())
    }

    fn connect_options(&self, role: ClientRole, id: usize) -> ConnectOptions {
        ConnectOptions {
            client_id: generate_client_id(crate::defaults::CLIENT_ID_PREFIX, role, id),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: self.keep_alive,
            max_payload_size: self.payload_size + PAYLOAD_ENVELOPE,
        }
    }
}

/// Runs one benchmark against the configured broker
///
/// ## Usage Pattern
///
/// ```rust,no_run
/// # use mqtt_latency_bench::benchmark::{BenchmarkConfig, BenchmarkRunner};
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let config = BenchmarkConfig::new("tcp://localhost:1883", "/test", 1, 100, 100, 10, false)?;
/// let document = BenchmarkRunner::new(config).run().await?;
/// println!("{}", document.render_text());
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    factory: ClientFactory,
}

impl BenchmarkRunner {
    /// Create a runner whose clients connect to `config.broker`
    pub fn new(config: BenchmarkConfig) -> Self {
        let factory = ClientFactory::new(config.broker.clone());
        Self { config, factory }
    }

    /// Create a runner that builds its clients with `factory`
    pub fn with_factory(config: BenchmarkConfig, factory: ClientFactory) -> Self {
        Self { config, factory }
    }

    /// Run the benchmark and return the result document
    ///
    /// ## Errors
    ///
    /// Only configuration errors (wrapping `ConfigError`) and a worker
    /// exiting without reporting fail the run. Everything a worker observes
    /// on the wire is captured in its counters.
    pub async fn run(&self) -> Result<ResultDocument> {
        self.config.validate()?;
        let clients = self.config.clients;
        let quiet = self.config.quiet;

        if !quiet {
            info!("{}", BenchmarkConfigDisplay { config: &self.config });
            info!("Starting subscribe..");
        }

        let (ready_tx, mut ready_rx) = mpsc::channel(clients);
        let (report_tx, mut report_rx) = mpsc::channel(clients);
        let mut stops = Vec::with_capacity(clients);
        let mut subscribers = Vec::with_capacity(clients);

        for id in 0..clients {
            let (stop_tx, stop_rx) = oneshot::channel();
            stops.push(stop_tx);

            let subscriber = Subscriber::new(self.subscriber_spec(id), self.factory.create());
            subscribers.push(tokio::spawn(subscriber.run(SubscriberChannels {
                ready: ready_tx.clone(),
                stop: stop_rx,
                results: report_tx.clone(),
            })));
        }
        drop(ready_tx);
        drop(report_tx);

        // No publisher may start before every subscriber is listening.
        let mut ready = 0;
        while ready < clients {
            match ready_rx.recv().await {
                Some(id) => {
                    ready += 1;
                    debug!("Subscriber {} ready ({}/{})", id, ready, clients);
                }
                None => bail!("only {} of {} subscribers became ready", ready, clients),
            }
        }
        if !quiet {
            info!("all subscribe job done.");
            info!("Starting publish..");
        }

        let (result_tx, mut result_rx) = mpsc::channel(clients);
        let start = Instant::now();
        for id in 0..clients {
            let publisher = Publisher::new(self.publisher_spec(id), self.factory.create());
            tokio::spawn(publisher.run(result_tx.clone()));
        }
        drop(result_tx);

        let mut publishers: Vec<PublisherResult> = Vec::with_capacity(clients);
        while publishers.len() < clients {
            match result_rx.recv().await {
                Some(result) => publishers.push(result),
                None => bail!("only {} of {} publishers reported", publishers.len(), clients),
            }
        }
        let total_run_time = start.elapsed();
        debug!("All publishers finished in {}", format_duration(total_run_time));

        self.quiesce().await;

        for stop in stops {
            // A subscriber that already exited has nothing left to stop.
            let _ = stop.send(());
        }

        let mut reports: Vec<SubscriberReport> = Vec::with_capacity(clients);
        while reports.len() < clients {
            match report_rx.recv().await {
                Some(report) => reports.push(report),
                None => bail!("only {} of {} subscribers reported", reports.len(), clients),
            }
        }
        for handle in subscribers {
            if let Err(e) = handle.await {
                warn!("Subscriber task failed: {}", e);
            }
        }

        if !quiet {
            info!("All jobs done.");
        }
        Ok(ResultDocument::assemble(publishers, reports, total_run_time))
    }

    /// Hold for the quiescence window, logging a countdown once per second
    async fn quiesce(&self) {
        let tick = Duration::from_secs(1);
        let mut remaining = self.config.quiescence;

        while !remaining.is_zero() {
            if !self.config.quiet {
                info!(
                    "Benchmark will stop after {} seconds.",
                    remaining.as_secs_f64().ceil()
                );
            }
            let step = remaining.min(tick);
            sleep(step).await;
            remaining -= step;
        }
    }

    fn subscriber_spec(&self, id: usize) -> SubscriberSpec {
        SubscriberSpec {
            id,
            topic: worker_topic(&self.config.topic_prefix, id),
            qos: self.config.qos,
            connect: self.config.connect_options(ClientRole::Subscriber, id),
            quiet: self.config.quiet,
        }
    }

    fn publisher_spec(&self, id: usize) -> PublisherSpec {
        PublisherSpec {
            id,
            topic: worker_topic(&self.config.topic_prefix, id),
            qos: self.config.qos,
            payload_size: self.config.payload_size,
            msg_count: self.config.msg_count,
            connect: self.config.connect_options(ClientRole::Publisher, id),
            quiet: self.config.quiet,
        }
    }
}

/// Run a benchmark and return the serialized result document
pub async fn run_json(config: BenchmarkConfig) -> Result<Vec<u8>> {
    BenchmarkRunner::new(config).run().await?.to_json()
}
