use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use tracing::debug;
use url::Url;

use crate::value::TypedValue;

/// Somewhere to send coerced values. Delivery is best effort: an `Ok` means the value left this process, not that
/// anyone received it.
#[async_trait(?Send)]
pub trait Telemetry {
    async fn publish(&mut self, topic: &str, value: TypedValue) -> crate::Result<()>;
}

/// Builds broker options from an `mqtt://[user:password@]host[:port]` URL, naming the client after this package unless
/// the URL carries its own `client_id`.
pub fn options(mut url: Url) -> crate::Result<MqttOptions> {
    if !url.query_pairs().any(|(key, _)| key == "client_id") {
        url.query_pairs_mut()
            .append_pair("client_id", env!("CARGO_PKG_NAME"))
            .finish();
    }
    Ok(url.try_into()?)
}

/// Publishes each value over its own short-lived connection: connect, publish at most once, disconnect.
///
/// Nothing is held open between publishes, so a broker restart between two metrics costs at most the metric that was
/// in flight.
pub struct Publisher {
    options: MqttOptions,
    timeout: Duration,
}

impl Publisher {
    /// `timeout` bounds the whole connect/publish/disconnect exchange of a single value.
    pub fn new(options: MqttOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    async fn publish_once(&self, topic: &str, payload: String) -> crate::Result<()> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 10);

        // Both requests are queued up front; the event loop connects and then drains them in order.
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        client.disconnect().await?;

        loop {
            match eventloop.poll().await? {
                Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
                event => debug!(?event),
            }
        }
    }
}

#[async_trait(?Send)]
impl Telemetry for Publisher {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn publish(&mut self, topic: &str, value: TypedValue) -> crate::Result<()> {
        tokio::time::timeout(self.timeout, self.publish_once(topic, value.to_string())).await?
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn options_from_url() {
    let options = options(Url::parse("mqtt://broker.local:1884").unwrap()).unwrap();
    assert_eq!(options.broker_address(), ("broker.local".to_owned(), 1884));
    assert_eq!(options.client_id(), "neura-mqtt");

    let options = options_with_id();
    assert_eq!(options.client_id(), "heatpump");
}

#[cfg(test)]
fn options_with_id() -> MqttOptions {
    options(Url::parse("mqtt://localhost:1883?client_id=heatpump").unwrap()).unwrap()
}

#[test]
fn options_reject_unknown_scheme() {
    assert!(options(Url::parse("http://localhost:1883").unwrap()).is_err());
}

// Minimal MQTT 3.1.1 broker: accepts one client, acknowledges its CONNECT and records every packet until the client
// disconnects or hangs up.
#[cfg(test)]
async fn accept_one(listener: tokio::net::TcpListener) -> Vec<(u8, Vec<u8>)> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (mut stream, _) = listener.accept().await.unwrap();
    let mut packets = vec![];
    loop {
        let Ok(header) = stream.read_u8().await else {
            break;
        };

        let mut length = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            length |= usize::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        let mut body = vec![0; length];
        stream.read_exact(&mut body).await.unwrap();

        let packet_type = header >> 4;
        packets.push((packet_type, body));
        match packet_type {
            // CONNECT
            1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
            // DISCONNECT
            14 => break,
            _ => {}
        }
    }
    packets
}

#[tokio::test]
async fn publish_connects_publishes_and_disconnects() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(accept_one(listener));

    let mut publisher = Publisher::new(
        MqttOptions::new("neura-mqtt-test", "127.0.0.1", port),
        Duration::from_secs(5),
    );
    publisher
        .publish("X/temp", TypedValue::Float(45.0))
        .await
        .unwrap();

    let packets = broker.await.unwrap();
    let types: Vec<u8> = packets.iter().map(|(t, _)| *t).collect();
    assert_eq!(types, vec![1, 3, 14]);

    // QoS 0 PUBLISH: topic length, topic, payload (no packet id).
    let publish = &packets[1].1;
    let topic_len = usize::from(u16::from_be_bytes([publish[0], publish[1]]));
    assert_eq!(&publish[2..2 + topic_len], b"X/temp");
    assert_eq!(&publish[2 + topic_len..], b"45");
}

#[tokio::test]
async fn publish_to_unreachable_broker_fails() {
    // Bind and immediately drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut publisher = Publisher::new(
        MqttOptions::new("neura-mqtt-test", "127.0.0.1", port),
        Duration::from_secs(5),
    );
    let result = publisher.publish("X/temp", TypedValue::Float(1.0)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn publish_times_out_on_silent_broker() {
    // Accepts the TCP connection but never answers the CONNECT.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _held = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });

    let mut publisher = Publisher::new(
        MqttOptions::new("neura-mqtt-test", "127.0.0.1", port),
        Duration::from_millis(200),
    );
    let result = publisher.publish("X/temp", TypedValue::Float(1.0)).await;
    assert!(matches!(result, Err(crate::Error::Timeout(_))));
}
