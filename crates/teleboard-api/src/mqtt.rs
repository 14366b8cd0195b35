//! rumqttc-backed [`Transport`].
//!
//! Each [`open`](MqttTransport::open) builds a fresh `AsyncClient` /
//! `EventLoop` pair. The event loop performs the TCP/TLS connect on its
//! first poll, so connection failures surface from
//! [`EventSource::next_event`] rather than from `open` itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use teleboard_api::{MqttTransport, SessionOptions, Transport, EventSource};
//!
//! let opts = SessionOptions::new("mqtt://localhost:1883".parse()?, "dash-1");
//! let (link, mut events) = MqttTransport.open(&opts).await?;
//! while let Ok(event) = events.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet};
use secrecy::ExposeSecret;

use crate::error::Error;
use crate::topic::TopicFilter;
use crate::transport::{
    EventSource, Link, MIN_KEEP_ALIVE, QoS, SessionOptions, TlsMode, Transport, TransportEvent,
};

// ── MqttTransport ────────────────────────────────────────────────────

/// Production transport speaking MQTT 3.1.1 over TCP or TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttTransport;

impl Transport for MqttTransport {
    type Link = MqttLink;
    type Events = MqttEvents;

    async fn open(&self, options: &SessionOptions) -> Result<(MqttLink, MqttEvents), Error> {
        let mqtt_options = build_options(options)?;
        let (client, eventloop) = AsyncClient::new(mqtt_options, options.request_capacity);

        tracing::debug!(
            broker = %options.broker,
            client_id = %options.client_id,
            tls = options.uses_tls(),
            "MQTT session opened"
        );

        Ok((MqttLink { client }, MqttEvents { eventloop }))
    }
}

fn build_options(options: &SessionOptions) -> Result<MqttOptions, Error> {
    let (host, port) = options.host_port()?;

    let mut mqtt = MqttOptions::new(options.client_id.clone(), host, port);
    mqtt.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));
    mqtt.set_clean_session(options.clean_session);

    if let Some(ref creds) = options.credentials {
        mqtt.set_credentials(creds.username.clone(), creds.password.expose_secret());
    }

    match &options.tls {
        TlsMode::Disabled => {}
        TlsMode::System => {
            mqtt.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        TlsMode::CustomCa(path) => {
            let ca = std::fs::read(path).map_err(|e| {
                Error::Tls(format!("failed to read CA bundle {}: {e}", path.display()))
            })?;
            mqtt.set_transport(rumqttc::Transport::tls(ca, None, None));
        }
    }

    Ok(mqtt)
}

// ── Link ─────────────────────────────────────────────────────────────

/// Outbound half backed by `rumqttc::AsyncClient`.
///
/// Subscribe and disconnect use the non-blocking `try_*` calls: they are
/// issued from the same task that polls the event loop, and a blocking send
/// into a full request queue would stall that loop.
pub struct MqttLink {
    client: AsyncClient,
}

impl Link for MqttLink {
    async fn subscribe(&self, filter: &TopicFilter, qos: QoS) -> Result<(), Error> {
        self.client
            .try_subscribe(filter.as_str(), qos.into())
            .map_err(|e| Error::Request {
                operation: "subscribe",
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), Error> {
        self.client
            .publish_bytes(topic, qos.into(), false, payload)
            .await
            .map_err(|e| Error::Request {
                operation: "publish",
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.client.try_disconnect().map_err(|e| Error::Request {
            operation: "disconnect",
            reason: e.to_string(),
        })
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// Inbound half backed by `rumqttc::EventLoop`.
pub struct MqttEvents {
    eventloop: EventLoop,
}

impl EventSource for MqttEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, Error> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => Ok(TransportEvent::ConnAck {
                session_present: ack.session_present,
            }),
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            }),
            Ok(Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect)) => {
                Ok(TransportEvent::Disconnected)
            }
            Ok(other) => {
                tracing::trace!(event = ?other, "MQTT protocol event");
                Ok(TransportEvent::Heartbeat)
            }
            Err(e) => Err(map_connection_error(e)),
        }
    }
}

fn map_connection_error(err: ConnectionError) -> Error {
    match err {
        ConnectionError::ConnectionRefused(code) => Error::Refused(format!("{code:?}")),
        ConnectionError::NetworkTimeout => {
            Error::Connection("timed out establishing the network connection".into())
        }
        other => Error::Connection(other.to_string()),
    }
}

// ── QoS mapping ──────────────────────────────────────────────────────

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}
