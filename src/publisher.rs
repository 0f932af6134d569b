//! Publisher worker: sends a fixed number of timestamped messages and reports
//! how long each publish took to be acknowledged.

use crate::broker::{BrokerClient, ConnectOptions, Message, QoS};
use crate::metrics::{LatencyCollector, LatencyType};
use crate::results::PublisherResult;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Parameters for one publisher
#[derive(Debug, Clone)]
pub struct PublisherSpec {
    pub id: usize,
    pub topic: String,
    pub qos: QoS,
    pub payload_size: usize,
    pub msg_count: usize,
    pub connect: ConnectOptions,
    pub quiet: bool,
}

pub struct Publisher {
    spec: PublisherSpec,
    client: Box<dyn BrokerClient>,
}

impl Publisher {
    pub fn new(spec: PublisherSpec, client: Box<dyn BrokerClient>) -> Self {
        Self { spec, client }
    }

    /// Run the publish loop and send the result on `results`.
    ///
    /// A failed connect is not fatal: every publish then fails with
    /// `NotConnected` and is counted as a failure.
    pub async fn run(mut self, results: mpsc::Sender<PublisherResult>) {
        let result = self.publish_all().await;
        if results.send(result).await.is_err() {
            warn!("Publisher {} finished after the collector went away", self.spec.id);
        }
    }

    async fn publish_all(&mut self) -> PublisherResult {
        let spec = &self.spec;

        if let Err(e) = self.client.connect(&spec.connect).await {
            warn!("Publisher {} failed to connect: {}", spec.id, e);
        } else if !spec.quiet {
            debug!("Publisher {} connected ({})", spec.id, self.client.name());
        }

        let mut latencies = LatencyCollector::with_capacity(LatencyType::Publish, spec.msg_count);
        let mut successes = 0u64;
        let mut failures = 0u64;

        let started = Instant::now();
        for _ in 0..spec.msg_count {
            let mut message = Message::new(&spec.topic, spec.qos, spec.payload_size);
            let outcome = match message.to_bytes() {
                Ok(bytes) => {
                    let publish_start = Instant::now();
                    self.client
                        .publish(&message.topic, message.qos, bytes)
                        .await
                        .map(|_| publish_start.elapsed())
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(elapsed) => {
                    successes += 1;
                    latencies.record(elapsed);
                }
                Err(e) => {
                    message.error = true;
                    failures += 1;
                    debug!("Publisher {} message failed: {}", spec.id, e);
                }
            }
        }
        let run_time = if spec.msg_count == 0 {
            Duration::ZERO
        } else {
            started.elapsed()
        };

        if let Err(e) = self.client.disconnect().await {
            debug!("Publisher {} disconnect failed: {}", spec.id, e);
        }

        if !spec.quiet {
            debug!(
                "Publisher {} done: {} ok, {} failed in {:?} ({} {:?} samples)",
                spec.id,
                successes,
                failures,
                run_time,
                latencies.sample_count(),
                latencies.latency_type()
            );
        }

        PublisherResult::new(spec.id, successes, failures, run_time, latencies.stats())
    }
}
