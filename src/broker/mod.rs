use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod loopback;
pub mod mqtt;

pub use loopback::{LoopbackBroker, LoopbackClient};
pub use mqtt::MqttClient;

/// Default MQTT port used when the broker address omits one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Errors surfaced by a broker client
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("client is not connected")]
    NotConnected,

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Fatal configuration problems detected before any worker starts
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid client count {0}: at least one client is required")]
    InvalidClientCount(usize),

    #[error("invalid QoS level {0}: expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("invalid broker address '{0}'")]
    InvalidBrokerAddress(String),
}

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QoS {
    /// Fire-and-forget
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible
    AtLeastOnce,
    /// Four-way handshake, delivered once
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = ConfigError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ConfigError::InvalidQos(other)),
        }
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QoS {}", self.level())
    }
}

/// Where the workers connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEndpoint {
    /// A network MQTT broker
    Mqtt { host: String, port: u16 },
    /// The in-process loopback broker registered under `name`
    Loopback { name: String },
}

impl BrokerEndpoint {
    /// Parse a broker address.
    ///
    /// Accepts `tcp://host[:port]`, `mqtt://host[:port]`, a bare `host[:port]`
    /// and `loopback://name`. A missing MQTT port defaults to 1883.
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let address = address.trim();
        let invalid = || ConfigError::InvalidBrokerAddress(address.to_string());

        if let Some(name) = address.strip_prefix("loopback://") {
            return Ok(BrokerEndpoint::Loopback {
                name: name.to_string(),
            });
        }

        let rest = if let Some(stripped) = address.strip_prefix("tcp://") {
            stripped
        } else if let Some(stripped) = address.strip_prefix("mqtt://") {
            stripped
        } else if address.contains("://") {
            return Err(invalid());
        } else {
            address
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (rest, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(BrokerEndpoint::Mqtt {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerEndpoint::Mqtt { host, port } => write!(f, "tcp://{}:{}", host, port),
            BrokerEndpoint::Loopback { name } => write!(f, "loopback://{}", name),
        }
    }
}

/// Per-connection options handed to `BrokerClient::connect`
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Largest encoded payload the client is expected to carry
    pub max_payload_size: usize,
}

/// A message delivered to a subscriber
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Body carried on the wire: the send timestamp followed by filler bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePayload {
    sent_ns: i64,
    filler: Vec<u8>,
}

/// One unit of benchmark work.
///
/// Created by a publisher at send time; `delivered` is filled on the
/// subscriber side when the payload is decoded from a `Delivery`.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub qos: QoS,
    pub payload: Vec<u8>,
    pub sent: DateTime<Utc>,
    pub delivered: Option<DateTime<Utc>>,
    pub error: bool,
}

impl Message {
    /// Create a message stamped with the current time and `size` filler bytes
    pub fn new(topic: &str, qos: QoS, size: usize) -> Self {
        Self {
            topic: topic.to_string(),
            qos,
            payload: vec![0u8; size],
            sent: Utc::now(),
            delivered: None,
            error: false,
        }
    }

    /// Encode the send timestamp and filler for publishing
    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        let wire = WirePayload {
            sent_ns: self.sent.timestamp_nanos_opt().unwrap_or_default(),
            filler: self.payload.clone(),
        };
        bincode::serialize(&wire).map_err(|e| BrokerError::Payload(e.to_string()))
    }

    /// Rebuild a message from a delivery, stamping it as delivered
    pub fn from_delivery(delivery: &Delivery, qos: QoS) -> Result<Self, BrokerError> {
        let wire: WirePayload = bincode::deserialize(&delivery.payload)
            .map_err(|e| BrokerError::Payload(e.to_string()))?;
        Ok(Self {
            topic: delivery.topic.clone(),
            qos,
            payload: wire.filler,
            sent: DateTime::<Utc>::from_timestamp_nanos(wire.sent_ns),
            delivered: Some(delivery.received_at),
            error: false,
        })
    }

    /// Time between send and delivery; zero when clocks disagree
    pub fn forward_latency(&self) -> Option<Duration> {
        self.delivered
            .map(|delivered| (delivered - self.sent).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Client seam onto the messaging library.
///
/// Workers only talk to the broker through this trait, so the orchestration
/// can run against a network broker or the in-process loopback alike.
#[async_trait]
pub trait BrokerClient: Send {
    /// Establish the session; returns once the broker accepted the connection
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError>;

    /// Publish one payload and wait for the acknowledgement its QoS implies
    async fn publish(&mut self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe to `topic`; deliveries arrive on the returned channel
    async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError>;

    /// Close the session
    async fn disconnect(&mut self) -> Result<(), BrokerError>;

    /// Client implementation name for logging
    fn name(&self) -> &'static str;
}

/// Creates broker clients for the configured endpoint
#[derive(Clone)]
pub struct ClientFactory {
    endpoint: BrokerEndpoint,
    loopback: Option<Arc<LoopbackBroker>>,
}

impl ClientFactory {
    /// Factory for `endpoint`; loopback endpoints resolve to the named in-process broker
    pub fn new(endpoint: BrokerEndpoint) -> Self {
        let loopback = match &endpoint {
            BrokerEndpoint::Loopback { name } => Some(LoopbackBroker::named(name)),
            BrokerEndpoint::Mqtt { .. } => None,
        };
        Self { endpoint, loopback }
    }

    /// Factory bound to a specific loopback broker instance
    pub fn with_loopback(broker: Arc<LoopbackBroker>) -> Self {
        Self {
            endpoint: BrokerEndpoint::Loopback {
                name: broker.name().to_string(),
            },
            loopback: Some(broker),
        }
    }

    /// Create a fresh, unconnected client
    pub fn create(&self) -> Box<dyn BrokerClient> {
        match (&self.endpoint, &self.loopback) {
            (_, Some(broker)) => Box::new(LoopbackClient::new(Arc::clone(broker))),
            (BrokerEndpoint::Mqtt { host, port }, None) => {
                Box::new(MqttClient::new(host.clone(), *port))
            }
            (BrokerEndpoint::Loopback { name }, None) => {
                Box::new(LoopbackClient::new(LoopbackBroker::named(name)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_addresses() {
        assert_eq!(
            BrokerEndpoint::parse("tcp://localhost:1883").unwrap(),
            BrokerEndpoint::Mqtt {
                host: "localhost".to_string(),
                port: 1883
            }
        );
        assert_eq!(
            BrokerEndpoint::parse("mqtt://broker.local").unwrap(),
            BrokerEndpoint::Mqtt {
                host: "broker.local".to_string(),
                port: DEFAULT_MQTT_PORT
            }
        );
        assert_eq!(
            BrokerEndpoint::parse("10.0.0.5:11883").unwrap(),
            BrokerEndpoint::Mqtt {
                host: "10.0.0.5".to_string(),
                port: 11883
            }
        );
        assert_eq!(
            BrokerEndpoint::parse("loopback://bench").unwrap(),
            BrokerEndpoint::Loopback {
                name: "bench".to_string()
            }
        );

        assert!(BrokerEndpoint::parse("ws://localhost:80").is_err());
        assert!(BrokerEndpoint::parse("tcp://localhost:notaport").is_err());
        assert!(BrokerEndpoint::parse("tcp://:1883").is_err());
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = BrokerEndpoint::parse("localhost").unwrap();
        assert_eq!(endpoint.to_string(), "tcp://localhost:1883");
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert_eq!(QoS::try_from(3), Err(ConfigError::InvalidQos(3)));
        assert_eq!(QoS::AtLeastOnce.level(), 1);
    }

    #[test]
    fn test_message_payload_carries_send_time() {
        let message = Message::new("bench-0", QoS::AtLeastOnce, 64);
        let bytes = message.to_bytes().unwrap();
        assert!(bytes.len() > 64);

        let delivery = Delivery {
            topic: "bench-0".to_string(),
            payload: bytes,
            received_at: message.sent + chrono::Duration::milliseconds(5),
        };
        let received = Message::from_delivery(&delivery, QoS::AtLeastOnce).unwrap();

        assert_eq!(received.payload.len(), 64);
        assert_eq!(received.sent, message.sent);
        assert_eq!(received.forward_latency(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_forward_latency_clamps_clock_skew() {
        let mut message = Message::new("bench-0", QoS::AtMostOnce, 0);
        message.delivered = Some(message.sent - chrono::Duration::milliseconds(3));
        assert_eq!(message.forward_latency(), Some(Duration::ZERO));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let delivery = Delivery {
            topic: "bench-0".to_string(),
            payload: vec![1, 2, 3],
            received_at: Utc::now(),
        };
        assert!(matches!(
            Message::from_delivery(&delivery, QoS::AtMostOnce),
            Err(BrokerError::Payload(_))
        ));
    }
}
