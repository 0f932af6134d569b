//! Subscriber worker: listens on one topic until told to stop and measures
//! the forward latency of every delivered message.

use crate::broker::{BrokerClient, ConnectOptions, Delivery, Message, QoS};
use crate::metrics::{LatencyCollector, LatencyType};
use crate::results::SubscriberReport;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Parameters for one subscriber
#[derive(Debug, Clone)]
pub struct SubscriberSpec {
    pub id: usize,
    pub topic: String,
    pub qos: QoS,
    pub connect: ConnectOptions,
    pub quiet: bool,
}

/// Signals connecting a subscriber to the orchestrator
pub struct SubscriberChannels {
    /// Sent once the subscription is in place (or has failed)
    pub ready: mpsc::Sender<usize>,
    /// Fires when the subscriber should report
    pub stop: oneshot::Receiver<()>,
    pub results: mpsc::Sender<SubscriberReport>,
}

pub struct Subscriber {
    spec: SubscriberSpec,
    client: Box<dyn BrokerClient>,
    received: u64,
    latencies: LatencyCollector,
}

impl Subscriber {
    pub fn new(spec: SubscriberSpec, client: Box<dyn BrokerClient>) -> Self {
        Self {
            spec,
            client,
            received: 0,
            latencies: LatencyCollector::new(LatencyType::Forward),
        }
    }

    /// Subscribe, signal ready, then count deliveries until stopped
    pub async fn run(mut self, channels: SubscriberChannels) {
        let SubscriberChannels {
            ready,
            mut stop,
            results,
        } = channels;

        let deliveries = self.subscribe().await;

        // The orchestrator counts ready signals; a failed subscription must
        // still be reported or the barrier never completes.
        if ready.send(self.spec.id).await.is_err() {
            warn!("Subscriber {} ready signal was not received", self.spec.id);
        }

        if let Some(mut deliveries) = deliveries {
            loop {
                tokio::select! {
                    delivery = deliveries.recv() => match delivery {
                        Some(delivery) => self.on_delivery(&delivery),
                        None => {
                            debug!("Subscriber {} delivery channel closed", self.spec.id);
                            // Nothing more can arrive; wait for the stop signal.
                            let _ = (&mut stop).await;
                            break;
                        }
                    },
                    _ = &mut stop => {
                        while let Ok(delivery) = deliveries.try_recv() {
                            self.on_delivery(&delivery);
                        }
                        break;
                    }
                }
            }

            if let Err(e) = self.client.disconnect().await {
                debug!("Subscriber {} disconnect failed: {}", self.spec.id, e);
            }
        } else {
            let _ = stop.await;
        }

        let report = SubscriberReport {
            id: self.spec.id,
            received: self.received,
            fwd: self.latencies.stats(),
        };
        if !self.spec.quiet {
            debug!(
                "Subscriber {} done: {} received ({} {:?} samples)",
                self.spec.id,
                report.received,
                self.latencies.sample_count(),
                self.latencies.latency_type()
            );
        }
        if results.send(report).await.is_err() {
            warn!("Subscriber {} finished after the collector went away", self.spec.id);
        }
    }

    async fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        if let Err(e) = self.client.connect(&self.spec.connect).await {
            warn!("Subscriber {} failed to connect: {}", self.spec.id, e);
            return None;
        }

        match self.client.subscribe(&self.spec.topic, self.spec.qos).await {
            Ok(deliveries) => {
                if !self.spec.quiet {
                    debug!(
                        "Subscriber {} listening on '{}' ({})",
                        self.spec.id,
                        self.spec.topic,
                        self.client.name()
                    );
                }
                Some(deliveries)
            }
            Err(e) => {
                warn!("Subscriber {} failed to subscribe: {}", self.spec.id, e);
                if let Err(e) = self.client.disconnect().await {
                    debug!("Subscriber {} disconnect failed: {}", self.spec.id, e);
                }
                None
            }
        }
    }

    fn on_delivery(&mut self, delivery: &Delivery) {
        self.received += 1;
        match Message::from_delivery(delivery, self.spec.qos) {
            Ok(message) => {
                if let Some(latency) = message.forward_latency() {
                    self.latencies.record(latency);
                }
            }
            Err(e) => debug!("Subscriber {} got an undecodable payload: {}", self.spec.id, e),
        }
    }
}
