//! `MqttClient` against a scripted MQTT 3.1.1 broker on a local socket.
//!
//! The broker side answers each control packet with the reply a real broker
//! would send, so the client's connect, publish and subscribe paths run over
//! real TCP without an external server.

use anyhow::{bail, Result};
use mqtt_latency_bench::broker::{BrokerClient, BrokerError, ConnectOptions, MqttClient, QoS};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Topic and body the broker pushes after a successful SUBACK
const PUSHED_TOPIC: &str = "itest/pushed";
const PUSHED_BODY: &[u8] = b"pushed-body";

#[derive(Debug, Clone, Copy)]
enum Script {
    /// Acknowledge everything
    Accept,
    /// Answer SUBSCRIBE with the 0x80 failure return code
    RejectSubscribe,
    /// Close the socket right after CONNACK
    CloseAfterConnAck,
}

/// Control packets the broker saw, by type nibble
#[derive(Debug, Default)]
struct Seen {
    publishes: Vec<u8>,
    pubrels: usize,
    disconnected: bool,
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let header = match stream.read_u8().await {
        Ok(header) => header,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

fn pushed_publish() -> Vec<u8> {
    let remaining = 2 + PUSHED_TOPIC.len() + PUSHED_BODY.len();
    let mut packet = vec![0x30, remaining as u8];
    packet.extend_from_slice(&(PUSHED_TOPIC.len() as u16).to_be_bytes());
    packet.extend_from_slice(PUSHED_TOPIC.as_bytes());
    packet.extend_from_slice(PUSHED_BODY);
    packet
}

async fn serve(mut stream: TcpStream, script: Script) -> std::io::Result<Seen> {
    let mut seen = Seen::default();

    while let Some((header, body)) = read_packet(&mut stream).await? {
        match header >> 4 {
            // CONNECT
            1 => {
                stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;
                if let Script::CloseAfterConnAck = script {
                    stream.shutdown().await?;
                    return Ok(seen);
                }
            }
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                seen.publishes.push(qos);
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let pid = &body[2 + topic_len..4 + topic_len];
                match qos {
                    1 => stream.write_all(&[0x40, 0x02, pid[0], pid[1]]).await?,
                    2 => stream.write_all(&[0x50, 0x02, pid[0], pid[1]]).await?,
                    _ => {}
                }
            }
            // PUBREL
            6 => {
                seen.pubrels += 1;
                stream.write_all(&[0x70, 0x02, body[0], body[1]]).await?;
            }
            // SUBSCRIBE
            8 => {
                let code = match script {
                    Script::RejectSubscribe => 0x80,
                    _ => 0x01,
                };
                stream
                    .write_all(&[0x90, 0x03, body[0], body[1], code])
                    .await?;
                if code != 0x80 {
                    stream.write_all(&pushed_publish()).await?;
                }
            }
            // PINGREQ
            12 => stream.write_all(&[0xd0, 0x00]).await?,
            // DISCONNECT
            14 => {
                seen.disconnected = true;
                return Ok(seen);
            }
            _ => {}
        }
    }
    Ok(seen)
}

async fn start_broker(script: Script) -> Result<(u16, JoinHandle<std::io::Result<Seen>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        serve(stream, script).await
    });
    Ok((port, handle))
}

fn connect_options(client_id: &str) -> ConnectOptions {
    ConnectOptions {
        client_id: client_id.to_string(),
        username: None,
        password: None,
        keep_alive: Duration::from_secs(30),
        max_payload_size: 128,
    }
}

/// Publishes complete at every QoS and a pushed message reaches the subscriber.
#[tokio::test]
async fn mqtt_round_trip_completes_at_every_qos() -> Result<()> {
    let (port, broker) = start_broker(Script::Accept).await?;
    let mut client = MqttClient::new("127.0.0.1".to_string(), port);

    timeout(STEP_TIMEOUT, client.connect(&connect_options("itest-accept"))).await??;

    let mut deliveries = timeout(
        STEP_TIMEOUT,
        client.subscribe("itest/#", QoS::AtLeastOnce),
    )
    .await??;
    let delivery = match timeout(STEP_TIMEOUT, deliveries.recv()).await? {
        Some(delivery) => delivery,
        None => bail!("delivery channel closed before the pushed message"),
    };
    assert_eq!(delivery.topic, PUSHED_TOPIC);
    assert_eq!(delivery.payload, PUSHED_BODY);

    for i in 0..5u8 {
        timeout(
            STEP_TIMEOUT,
            client.publish("itest/one", QoS::AtLeastOnce, vec![i; 16]),
        )
        .await??;
    }
    timeout(STEP_TIMEOUT, client.publish("itest/two", QoS::ExactlyOnce, vec![2; 16])).await??;
    timeout(STEP_TIMEOUT, client.publish("itest/zero", QoS::AtMostOnce, vec![0; 16])).await??;

    timeout(STEP_TIMEOUT, client.disconnect()).await??;

    let seen = timeout(STEP_TIMEOUT, broker).await???;
    assert_eq!(seen.publishes, vec![1, 1, 1, 1, 1, 2, 0]);
    assert_eq!(seen.pubrels, 1);
    assert!(seen.disconnected);
    Ok(())
}

/// A SUBACK carrying the failure return code surfaces as a subscribe error.
#[tokio::test]
async fn mqtt_rejected_subscription_is_an_error() -> Result<()> {
    let (port, _broker) = start_broker(Script::RejectSubscribe).await?;
    let mut client = MqttClient::new("127.0.0.1".to_string(), port);

    timeout(STEP_TIMEOUT, client.connect(&connect_options("itest-reject"))).await??;
    let outcome = timeout(STEP_TIMEOUT, client.subscribe("itest/denied", QoS::AtMostOnce)).await?;

    match outcome {
        Err(BrokerError::Subscribe { topic, .. }) => assert_eq!(topic, "itest/denied"),
        other => bail!("expected a subscribe error, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

/// Losing the connection fails the publish in flight instead of hanging it.
#[tokio::test]
async fn mqtt_publish_fails_after_connection_loss() -> Result<()> {
    let (port, broker) = start_broker(Script::CloseAfterConnAck).await?;
    let mut client = MqttClient::new("127.0.0.1".to_string(), port);

    timeout(STEP_TIMEOUT, client.connect(&connect_options("itest-close"))).await??;
    timeout(STEP_TIMEOUT, broker).await???;

    let outcome = timeout(
        STEP_TIMEOUT,
        client.publish("itest/lost", QoS::AtLeastOnce, vec![7; 16]),
    )
    .await?;
    assert!(
        matches!(outcome, Err(BrokerError::Publish { .. })),
        "expected a publish error, got {:?}",
        outcome
    );
    Ok(())
}
