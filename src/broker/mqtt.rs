//! MQTT 3.1.1 client backed by `rumqttc`.
//!
//! `rumqttc` splits a connection into an `AsyncClient` handle, used to queue
//! requests, and an `EventLoop` that must be polled to make progress. After
//! the CONNACK has been received the event loop is moved into a driver task
//! which forwards two kinds of events:
//!
//! - incoming PUBLISH packets, stamped with their receive time, to the
//!   delivery channel handed out by `subscribe`
//! - write/acknowledgement events to a completion channel that `publish` and
//!   `subscribe` wait on
//!
//! Each worker publishes strictly one message at a time, so the next
//! completion of the expected kind always belongs to the request in flight.
//! A connection error ends the driver; the client does not reconnect.

use super::{BrokerClient, BrokerError, ConnectOptions, Delivery, QoS};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Capacity of the request queue between `AsyncClient` and its event loop
const REQUEST_CAPACITY: usize = 64;

/// Room for the fixed header, topic and payload framing on top of the body
const PACKET_OVERHEAD: usize = 1024;

/// rumqttc's own default maximum packet size
const MIN_PACKET_SIZE: usize = 10 * 1024;

/// How long a disconnect waits for the driver to flush before aborting it
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Events the driver reports back to the request side
#[derive(Debug, Clone, PartialEq, Eq)]
enum Completion {
    /// A PUBLISH packet was written to the socket (QoS 0 completion)
    Written,
    /// PUBACK received (QoS 1 completion)
    PubAck,
    /// PUBCOMP received (QoS 2 completion)
    PubComp,
    /// SUBACK received; `false` when the broker rejected the filter
    SubAck(bool),
    /// The event loop failed and stopped
    Failed(String),
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn publish_completion(qos: QoS) -> Completion {
    match qos {
        QoS::AtMostOnce => Completion::Written,
        QoS::AtLeastOnce => Completion::PubAck,
        QoS::ExactlyOnce => Completion::PubComp,
    }
}

/// MQTT broker client
pub struct MqttClient {
    host: String,
    port: u16,
    client: Option<AsyncClient>,
    completions: Option<mpsc::UnboundedReceiver<Completion>>,
    deliveries: Option<mpsc::UnboundedReceiver<Delivery>>,
    driver: Option<JoinHandle<()>>,
}

impl MqttClient {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            client: None,
            completions: None,
            deliveries: None,
            driver: None,
        }
    }

    fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    fn build_options(&self, options: &ConnectOptions) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), self.host.clone(), self.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);

        let packet_size = (options.max_payload_size + PACKET_OVERHEAD).max(MIN_PACKET_SIZE);
        mqtt_options.set_max_packet_size(packet_size, packet_size);

        if let Some(username) = &options.username {
            let password = options.password.clone().unwrap_or_default();
            mqtt_options.set_credentials(username.clone(), password);
        }
        mqtt_options
    }

    /// Wait for the next completion of the `expected` kind
    async fn await_completion(&mut self, expected: &Completion) -> Result<(), String> {
        let completions = self
            .completions
            .as_mut()
            .ok_or_else(|| "client is not connected".to_string())?;

        loop {
            match completions.recv().await {
                Some(Completion::Failed(reason)) => return Err(reason),
                Some(completion) if &completion == expected => return Ok(()),
                Some(Completion::SubAck(false)) if matches!(expected, Completion::SubAck(_)) => {
                    return Err("broker rejected the subscription".to_string())
                }
                Some(_) => continue,
                None => return Err("event loop stopped".to_string()),
            }
        }
    }
}

/// Poll the event loop until it fails or the session is closed
async fn drive(
    mut eventloop: EventLoop,
    completions: mpsc::UnboundedSender<Completion>,
    deliveries: mpsc::UnboundedSender<Delivery>,
) {
    loop {
        let completion = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                // Nobody subscribed on this client; the delivery is dropped.
                let _ = deliveries.send(Delivery {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    received_at: Utc::now(),
                });
                continue;
            }
            Ok(Event::Incoming(Packet::PubAck(_))) => Completion::PubAck,
            Ok(Event::Incoming(Packet::PubComp(_))) => Completion::PubComp,
            Ok(Event::Incoming(Packet::SubAck(ack))) => Completion::SubAck(
                ack.return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure)),
            ),
            Ok(Event::Outgoing(Outgoing::Publish(_))) => Completion::Written,
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT session closed");
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("MQTT event loop stopped: {}", e);
                let _ = completions.send(Completion::Failed(e.to_string()));
                return;
            }
        };
        if completions.send(completion).is_err() {
            return;
        }
    }
}

#[async_trait]
impl BrokerClient for MqttClient {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError> {
        let address = self.address();
        let (client, mut eventloop) =
            AsyncClient::new(self.build_options(options), REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(BrokerError::Connect {
                        address,
                        reason: format!("{:?}", ack.code),
                    });
                }
                Ok(_) => continue,
                Err(e) => {
                    return Err(BrokerError::Connect {
                        address,
                        reason: e.to_string(),
                    })
                }
            }
        }
        debug!("Client {} connected to {}", options.client_id, address);

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        self.driver = Some(tokio::spawn(drive(eventloop, completion_tx, delivery_tx)));
        self.client = Some(client);
        self.completions = Some(completion_rx);
        self.deliveries = Some(delivery_rx);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let client = self.client.as_ref().ok_or(BrokerError::NotConnected)?;
        let publish_error = |reason: String| BrokerError::Publish {
            topic: topic.to_string(),
            reason,
        };

        client
            .publish(topic, to_mqtt_qos(qos), false, payload)
            .await
            .map_err(|e| publish_error(e.to_string()))?;
        self.await_completion(&publish_completion(qos))
            .await
            .map_err(publish_error)
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        let client = self.client.as_ref().ok_or(BrokerError::NotConnected)?;
        let subscribe_error = |reason: String| BrokerError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;
        self.await_completion(&Completion::SubAck(true))
            .await
            .map_err(subscribe_error)?;

        self.deliveries
            .take()
            .ok_or_else(|| subscribe_error("deliveries already taken".to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let client = self.client.take().ok_or(BrokerError::NotConnected)?;
        let result = client
            .disconnect()
            .await
            .map_err(|e| BrokerError::ConnectionClosed(e.to_string()));

        if let Some(mut driver) = self.driver.take() {
            if timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                driver.abort();
            }
        }
        self.completions = None;
        result
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
