//! In-process broker used for dry runs and tests.
//!
//! Topics map to the delivery channels of their subscribers; a publish fans
//! the payload out to every channel registered for the exact topic name.
//! Brokers are registered by name so that every client created for the same
//! `loopback://name` endpoint shares one topic table.

use super::{BrokerClient, BrokerError, ConnectOptions, Delivery, QoS};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>;

fn registry() -> &'static Mutex<HashMap<String, Arc<LoopbackBroker>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<LoopbackBroker>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Topic table shared by loopback clients
#[derive(Debug)]
pub struct LoopbackBroker {
    name: String,
    topics: Mutex<Subscribers>,
    accepting: AtomicBool,
    published: AtomicU64,
}

impl LoopbackBroker {
    /// Create a standalone broker that is not registered by name
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            topics: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            published: AtomicU64::new(0),
        })
    }

    /// Fetch the broker registered under `name`, creating it on first use
    pub fn named(name: &str) -> Arc<Self> {
        let mut brokers = registry().lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            brokers
                .entry(name.to_string())
                .or_insert_with(|| Self::new(name)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Refuse (or accept again) new connections
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of payloads accepted since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn subscribe(&self, topic: &str, sender: mpsc::UnboundedSender<Delivery>) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(topic.to_string()).or_default().push(sender);
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subscribers) = topics.get_mut(topic) {
            // Receivers that went away are pruned on the way through.
            subscribers.retain(|sender| {
                sender
                    .send(Delivery {
                        topic: topic.to_string(),
                        payload: payload.clone(),
                        received_at: Utc::now(),
                    })
                    .is_ok()
            });
        } else {
            trace!("No subscribers for loopback topic '{}'", topic);
        }
    }
}

/// Broker client talking to a `LoopbackBroker`
pub struct LoopbackClient {
    broker: Arc<LoopbackBroker>,
    client_id: Option<String>,
}

impl LoopbackClient {
    pub fn new(broker: Arc<LoopbackBroker>) -> Self {
        Self {
            broker,
            client_id: None,
        }
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        match self.client_id {
            Some(_) => Ok(()),
            None => Err(BrokerError::NotConnected),
        }
    }
}

#[async_trait]
impl BrokerClient for LoopbackClient {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError> {
        if !self.broker.is_accepting() {
            return Err(BrokerError::Connect {
                address: format!("loopback://{}", self.broker.name()),
                reason: "broker is not accepting connections".to_string(),
            });
        }
        debug!(
            "Client {} connected to loopback broker '{}'",
            options.client_id,
            self.broker.name()
        );
        self.client_id = Some(options.client_id.clone());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        _qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        self.broker.publish(topic, payload);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        _qos: QoS,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.broker.subscribe(topic, tx);
        Ok(rx)
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        self.client_id = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}
