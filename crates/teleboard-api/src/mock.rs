//! In-memory broker for exercising session lifecycles without a network.
//!
//! [`MockTransport`] plays both the client transport and the broker: tests
//! inject messages with [`deliver`](MockTransport::deliver), cut the current
//! session with [`drop_connection`](MockTransport::drop_connection), make
//! the next opens fail with [`refuse_next`](MockTransport::refuse_next),
//! slow down subscribe requests with
//! [`subscribe_delay`](MockTransport::subscribe_delay), and inspect what the
//! client subscribed to and published.
//!
//! Only compiled with the `test-util` feature (or inside this crate's tests).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::topic::TopicFilter;
use crate::transport::{EventSource, Link, QoS, SessionOptions, Transport, TransportEvent};

type EventTx = mpsc::UnboundedSender<Result<TransportEvent, Error>>;

/// A message the client published through a [`MockLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

struct MockSession {
    id: u64,
    filters: Vec<TopicFilter>,
    tx: EventTx,
}

#[derive(Default)]
struct BrokerState {
    refuse_remaining: u32,
    refuse_all: bool,
    ack_connections: bool,
    subscribe_delay: Duration,
    opens: u32,
    next_session_id: u64,
    session: Option<MockSession>,
    subscribe_log: Vec<String>,
    published: Vec<PublishedMessage>,
    client_ids: Vec<String>,
}

/// Cloneable handle to the shared mock broker.
#[derive(Clone)]
pub struct MockTransport {
    broker: Arc<Mutex<BrokerState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            broker: Arc::new(Mutex::new(BrokerState {
                ack_connections: true,
                ..BrokerState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Fault injection ─────────────────────────────────────────────

    /// Fail the next `n` calls to `open`.
    pub fn refuse_next(&self, n: u32) {
        self.state().refuse_remaining = n;
    }

    /// Fail every call to `open` until switched back off.
    pub fn refuse_all(&self, refuse: bool) {
        self.state().refuse_all = refuse;
    }

    /// When disabled, new sessions open but never receive a CONNACK.
    pub fn ack_connections(&self, ack: bool) {
        self.state().ack_connections = ack;
    }

    /// Hold every subscribe request for `delay` before the broker sees it.
    pub fn subscribe_delay(&self, delay: Duration) {
        self.state().subscribe_delay = delay;
    }

    /// Fail the current session with a transport error.
    pub fn drop_connection(&self) {
        if let Some(session) = self.state().session.take() {
            let _ = session.tx.send(Err(Error::Connection("connection reset by peer".into())));
        }
    }

    /// Close the current session cleanly, as a broker-initiated disconnect.
    pub fn close_gracefully(&self) {
        if let Some(session) = self.state().session.take() {
            let _ = session.tx.send(Ok(TransportEvent::Disconnected));
        }
    }

    // ── Traffic ─────────────────────────────────────────────────────

    /// Deliver a message to the current session if one of its filters
    /// matches. Returns whether the message was delivered.
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let state = self.state();
        let Some(session) = state.session.as_ref() else {
            return false;
        };
        if !session.filters.iter().any(|f| f.matches(topic)) {
            return false;
        }
        session
            .tx
            .send(Ok(TransportEvent::Message {
                topic: topic.to_owned(),
                payload: payload.into(),
            }))
            .is_ok()
    }

    /// Emit a protocol heartbeat on the current session.
    pub fn heartbeat(&self) {
        if let Some(session) = self.state().session.as_ref() {
            let _ = session.tx.send(Ok(TransportEvent::Heartbeat));
        }
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn open_count(&self) -> u32 {
        self.state().opens
    }

    pub fn is_session_open(&self) -> bool {
        self.state().session.is_some()
    }

    /// Filters subscribed on the current session.
    pub fn active_filters(&self) -> Vec<String> {
        self.state()
            .session
            .as_ref()
            .map(|s| s.filters.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// Every subscribe request across all sessions, in order.
    pub fn subscribe_log(&self) -> Vec<String> {
        self.state().subscribe_log.clone()
    }

    /// Every publish request across all sessions, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    /// Client ids presented on each open.
    pub fn client_ids(&self) -> Vec<String> {
        self.state().client_ids.clone()
    }
}

impl Transport for MockTransport {
    type Link = MockLink;
    type Events = MockEvents;

    async fn open(&self, options: &SessionOptions) -> Result<(MockLink, MockEvents), Error> {
        let mut state = self.state();
        state.opens += 1;
        state.client_ids.push(options.client_id.clone());

        if state.refuse_all {
            return Err(Error::Connection("mock broker unavailable".into()));
        }
        if state.refuse_remaining > 0 {
            state.refuse_remaining -= 1;
            return Err(Error::Connection("mock broker refused the socket".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if state.ack_connections {
            let _ = tx.send(Ok(TransportEvent::ConnAck {
                session_present: false,
            }));
        }

        state.next_session_id += 1;
        let id = state.next_session_id;
        state.session = Some(MockSession {
            id,
            filters: Vec::new(),
            tx,
        });

        Ok((
            MockLink {
                session_id: id,
                broker: self.clone(),
            },
            MockEvents { rx },
        ))
    }
}

/// Outbound half of a mock session.
pub struct MockLink {
    session_id: u64,
    broker: MockTransport,
}

impl MockLink {
    fn with_live_session<R>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> R,
    ) -> Result<R, Error> {
        let mut state = self.broker.state();
        let live = state
            .session
            .as_ref()
            .is_some_and(|s| s.id == self.session_id);
        if !live {
            return Err(Error::Closed);
        }
        Ok(f(&mut state))
    }
}

impl Link for MockLink {
    async fn subscribe(&self, filter: &TopicFilter, _qos: QoS) -> Result<(), Error> {
        let delay = self.broker.state().subscribe_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.with_live_session(|state| {
            state.subscribe_log.push(filter.to_string());
            if let Some(session) = state.session.as_mut() {
                if !session.filters.contains(filter) {
                    session.filters.push(filter.clone());
                }
            }
        })
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), Error> {
        self.with_live_session(|state| {
            state.published.push(PublishedMessage {
                topic: topic.to_owned(),
                payload,
                qos,
            });
        })
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.with_live_session(|state| {
            if let Some(session) = state.session.take() {
                let _ = session.tx.send(Ok(TransportEvent::Disconnected));
            }
        })
    }
}

/// Inbound half of a mock session.
pub struct MockEvents {
    rx: mpsc::UnboundedReceiver<Result<TransportEvent, Error>>,
}

impl EventSource for MockEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, Error> {
        self.rx.recv().await.unwrap_or(Err(Error::Closed))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn options() -> SessionOptions {
        SessionOptions::new("mqtt://mock.local".parse().unwrap(), "dash-mock")
    }

    #[tokio::test]
    async fn open_acks_and_routes_matching_messages() {
        let broker = MockTransport::new();
        let (link, mut events) = broker.open(&options()).await.unwrap();

        assert_eq!(
            events.next_event().await.unwrap(),
            TransportEvent::ConnAck {
                session_present: false
            }
        );

        let filter = TopicFilter::new("plant/+/speed").unwrap();
        link.subscribe(&filter, QoS::AtLeastOnce).await.unwrap();

        assert!(broker.deliver("plant/pump-1/speed", "x"));
        assert!(!broker.deliver("plant/pump-1/temp", "y"));

        match events.next_event().await.unwrap() {
            TransportEvent::Message { topic, payload } => {
                assert_eq!(topic, "plant/pump-1/speed");
                assert_eq!(&payload[..], b"x");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_opens_are_counted() {
        let broker = MockTransport::new();
        broker.refuse_next(2);

        assert!(broker.open(&options()).await.is_err());
        assert!(broker.open(&options()).await.is_err());
        assert!(broker.open(&options()).await.is_ok());
        assert_eq!(broker.open_count(), 3);
    }

    #[tokio::test]
    async fn dropped_session_errors_and_invalidates_link() {
        let broker = MockTransport::new();
        let (link, mut events) = broker.open(&options()).await.unwrap();
        let _ack = events.next_event().await.unwrap();

        broker.drop_connection();

        assert!(events.next_event().await.is_err());
        let err = link
            .publish("plant/pump-1/cmd/speed", Bytes::from_static(b"1"), QoS::AtMostOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
        assert!(broker.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_subscribe_fails_once_the_session_is_gone() {
        let broker = MockTransport::new();
        broker.subscribe_delay(Duration::from_millis(50));
        let (link, mut events) = broker.open(&options()).await.unwrap();
        let _ack = events.next_event().await.unwrap();

        let filter = TopicFilter::new("plant/#").unwrap();
        let pending = link.subscribe(&filter, QoS::AtLeastOnce);
        broker.drop_connection();

        assert!(matches!(pending.await, Err(Error::Closed)));
        assert!(broker.subscribe_log().is_empty());
    }

    #[tokio::test]
    async fn disconnect_ends_the_session_cleanly() {
        let broker = MockTransport::new();
        let (link, mut events) = broker.open(&options()).await.unwrap();
        let _ack = events.next_event().await.unwrap();

        link.disconnect().await.unwrap();
        assert_eq!(
            events.next_event().await.unwrap(),
            TransportEvent::Disconnected
        );
        assert!(!broker.is_session_open());
    }
}
