// Transport seam between the streaming core and a concrete broker client.
//
// A `Transport` opens one session at a time and hands back two halves:
// a `Link` for outbound requests (shared, `&self`) and an `EventSource`
// that the owning task polls for inbound traffic. Reconnecting means
// dropping both halves and opening a fresh pair.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::topic::TopicFilter;

const DEFAULT_PLAIN_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const DEFAULT_REQUEST_CAPACITY: usize = 128;

/// Shortest keep-alive the MQTT client will schedule pings for.
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

// ── QoS ──────────────────────────────────────────────────────────────

/// MQTT delivery guarantee, passed through to the broker.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

// ── Session options ──────────────────────────────────────────────────

/// Username/password pair presented in the MQTT CONNECT packet.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// TLS mode for the broker socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain TCP.
    #[default]
    Disabled,
    /// TLS with the platform root store.
    System,
    /// TLS trusting the PEM bundle at the given path.
    CustomCa(PathBuf),
}

/// Everything a transport needs to open one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Broker address, e.g. `mqtt://broker.local:1883` or `mqtts://host`.
    pub broker: Url,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub tls: TlsMode,
    /// Capacity of the client's outbound request queue.
    pub request_capacity: usize,
}

impl SessionOptions {
    pub fn new(broker: Url, client_id: impl Into<String>) -> Self {
        let tls = if scheme_is_tls(broker.scheme()) {
            TlsMode::System
        } else {
            TlsMode::Disabled
        };

        Self {
            broker,
            client_id: client_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            tls,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }

    /// Resolve `(host, port)` from the broker URL, applying scheme defaults.
    pub fn host_port(&self) -> Result<(String, u16), Error> {
        let scheme = self.broker.scheme();
        if !matches!(scheme, "mqtt" | "tcp" | "mqtts" | "ssl") {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme '{scheme}' (expected mqtt, mqtts, tcp or ssl)"
            )));
        }

        let host = self
            .broker
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUrl(format!("{} has no host", self.broker)))?;

        let default_port = if scheme_is_tls(scheme) {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };

        Ok((host.to_owned(), self.broker.port().unwrap_or(default_port)))
    }

    pub fn uses_tls(&self) -> bool {
        self.tls != TlsMode::Disabled
    }
}

fn scheme_is_tls(scheme: &str) -> bool {
    matches!(scheme, "mqtts" | "ssl")
}

// ── Events ───────────────────────────────────────────────────────────

/// Inbound traffic surfaced by an [`EventSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake acknowledged; the session is usable.
    ConnAck { session_present: bool },
    /// An application message on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// Protocol traffic with no application meaning (pings, acks).
    Heartbeat,
    /// The session ended cleanly.
    Disconnected,
}

// ── Traits ───────────────────────────────────────────────────────────

/// Opens broker sessions.
pub trait Transport: Send + Sync + 'static {
    type Link: Link;
    type Events: EventSource;

    /// Open a new session. The handshake completes asynchronously and is
    /// reported as [`TransportEvent::ConnAck`] on the event half.
    fn open(
        &self,
        options: &SessionOptions,
    ) -> impl Future<Output = Result<(Self::Link, Self::Events), Error>> + Send;
}

/// Outbound half of a session.
pub trait Link: Send + Sync + 'static {
    fn subscribe(
        &self,
        filter: &TopicFilter,
        qos: QoS,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Request a clean protocol-level disconnect.
    fn disconnect(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Inbound half of a session, polled by a single owner.
pub trait EventSource: Send + 'static {
    fn next_event(&mut self) -> impl Future<Output = Result<TransportEvent, Error>> + Send;
}

// ── Tests ────────────────────────────────────────────────────────────
