// ── Connection lifecycle ──
//
// Owns the single broker session: connect, reconnect with backoff,
// subscription replay, liveness watchdog, publish gating, and clean
// disconnect. The connection task is the only dispatcher of inbound
// traffic, so receive → decode → apply runs without an await point.

mod backoff;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use teleboard_api::{
    EventSource, Link, QoS, SessionOptions, TopicFilter, Transport, TransportEvent,
    validate_topic_name,
};

use crate::config::BrokerConfig;
use crate::error::CoreError;
use crate::model::InboundMessage;
use crate::router::TopicRouter;

pub use backoff::{capped_delay, jittered_delay};

/// How long a clean disconnect may take to flush before the session is
/// dropped anyway.
const DISCONNECT_DRAIN: Duration = Duration::from_millis(500);

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Connected => f.write_str("Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// `true` while a connection task is alive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting { .. }
        )
    }
}

// ── Statistics ───────────────────────────────────────────────────

/// Counters accumulated over the manager's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Application messages received from the broker.
    pub messages_received: u64,
    /// Messages that matched at least one handler.
    pub messages_dispatched: u64,
    /// Handler invocations that returned an error.
    pub handler_failures: u64,
    /// Sessions lost and scheduled for reconnection.
    pub reconnects: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
    reconnects: AtomicU64,
}

// ── ConnectionManager ────────────────────────────────────────────

/// Cheaply cloneable handle to the broker connection.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    router: Arc<TopicRouter>,
    state: watch::Sender<ConnectionState>,
    /// Outbound half of the live, acknowledged session.
    link: ArcSwapOption<T::Link>,
    /// Broker-side interest, replayed after every handshake.
    interest: StdMutex<Vec<(TopicFilter, QoS)>>,
    /// Parent of every per-session token.
    cancel: CancellationToken,
    session: Mutex<Option<Session>>,
    counters: Counters,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum SessionEnd {
    Cancelled,
    Lost {
        error: teleboard_api::Error,
        acked: bool,
    },
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, router: Arc<TopicRouter>) -> Self {
        Self::with_cancel(transport, router, CancellationToken::new())
    }

    /// Build a manager whose sessions are children of `parent`.
    pub fn with_cancel(transport: T, router: Arc<TopicRouter>, parent: CancellationToken) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                router,
                state,
                link: ArcSwapOption::empty(),
                interest: StdMutex::new(Vec::new()),
                cancel: parent,
                session: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.inner.router
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Validate `config` and start the connection task.
    ///
    /// Returns once the task is spawned; progress is reported through
    /// [`state_changes`](Self::state_changes). Calling this while a task is
    /// running is a no-op. From `Failed` or `Disconnected` a fresh task
    /// starts with the attempt counter at zero.
    pub async fn connect(&self, config: BrokerConfig) -> Result<(), CoreError> {
        config.validate()?;

        let mut session = self.inner.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            debug!("connect requested while a session task is running; ignoring");
            return Ok(());
        }

        info!(broker = %config.url, client_id = %config.client_id, "connecting to broker");
        self.inner.set_state(ConnectionState::Connecting);

        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(connection_task(
            Arc::clone(&self.inner),
            config,
            cancel.clone(),
        ));
        *session = Some(Session { cancel, handle });
        Ok(())
    }

    /// Stop the connection task, sending a clean disconnect if a session is
    /// live. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let session = self.inner.session.lock().await.take();
        if let Some(Session { cancel, handle }) = session {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "connection task ended abnormally");
            }
            info!("disconnected from broker");
        }
        self.inner.link.store(None);
        self.inner.set_state(ConnectionState::Disconnected);
    }

    // ── Traffic ──────────────────────────────────────────────────

    /// Publish once. Fails with [`CoreError::NotConnected`] unless the
    /// session is `Connected`.
    pub async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), CoreError> {
        validate_topic_name(topic)?;
        if !self.state().is_connected() {
            return Err(CoreError::NotConnected);
        }
        let link = self.inner.link.load_full().ok_or(CoreError::NotConnected)?;

        link.publish(topic, payload, qos).await?;
        trace!(topic, %qos, "published");
        Ok(())
    }

    /// Record broker-side interest in `pattern`. Issued right away once a
    /// session is acknowledged and replayed after every reconnect.
    pub async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), CoreError> {
        let filter = TopicFilter::new(pattern)?;
        {
            let mut interest = self.inner.interest();
            match interest.iter_mut().find(|(f, _)| *f == filter) {
                Some(entry) => entry.1 = qos,
                None => interest.push((filter.clone(), qos)),
            }
        }

        // The link is published before the handshake replay snapshots
        // `interest`, so a filter recorded mid-replay is sent from here.
        if let Some(link) = self.inner.link.load_full() {
            link.subscribe(&filter, qos).await?;
            debug!(filter = %filter, "subscribed");
        }
        Ok(())
    }

    /// Filters that will be (re)issued on every handshake.
    pub fn subscriptions(&self) -> Vec<TopicFilter> {
        self.inner.interest().iter().map(|(f, _)| f.clone()).collect()
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        let c = &self.inner.counters;
        ConnectionStats {
            messages_received: c.received.load(Ordering::Relaxed),
            messages_dispatched: c.dispatched.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl<T: Transport> Inner<T> {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "connection state changed");
        }
    }

    fn interest(&self) -> std::sync::MutexGuard<'_, Vec<(TopicFilter, QoS)>> {
        self.interest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-issue every recorded filter. Errors that end the session abort
    /// the replay; anything else is logged and skipped.
    async fn replay_interest(&self, link: &T::Link) -> Result<(), teleboard_api::Error> {
        let interest = self.interest().clone();
        for (filter, qos) in &interest {
            match link.subscribe(filter, *qos).await {
                Ok(()) => debug!(filter = %filter, "subscription replayed"),
                Err(e) if e.is_session_fatal() => return Err(e),
                Err(e) => warn!(filter = %filter, error = %e, "failed to replay subscription"),
            }
        }
        Ok(())
    }

    fn dispatch(&self, topic: String, payload: Bytes) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let message = InboundMessage {
            topic,
            payload,
            received_at: Utc::now(),
        };
        let outcome = self.router.dispatch(&message);
        if !outcome.is_unmatched() {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.failed > 0 {
            self.counters
                .handler_failures
                .fetch_add(u64::try_from(outcome.failed).unwrap_or(u64::MAX), Ordering::Relaxed);
        }
    }
}

// ── Background task ──────────────────────────────────────────────

/// Drive sessions until cancelled or the retry budget runs out.
async fn connection_task<T: Transport>(
    inner: Arc<Inner<T>>,
    config: BrokerConfig,
    cancel: CancellationToken,
) {
    let options = config.session_options();
    let policy = &config.reconnect;
    let mut attempt: u32 = 0;

    loop {
        inner.set_state(ConnectionState::Connecting);

        match run_session(&inner, &options, config.watchdog_timeout(), &cancel).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Lost { error, acked } => {
                if acked {
                    attempt = 0;
                }
                if policy.max_retries.is_some_and(|max| attempt >= max) {
                    warn!(error = %error, attempts = attempt, "retry budget exhausted, giving up");
                    inner.set_state(ConnectionState::Failed);
                    return;
                }

                inner.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                let delay = backoff::jittered_delay(attempt, policy, &mut rand::thread_rng());
                warn!(
                    error = %error,
                    attempt = attempt + 1,
                    delay = ?delay,
                    "broker connection lost, reconnecting"
                );
                inner.set_state(ConnectionState::Reconnecting {
                    attempt: attempt + 1,
                });

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }

    inner.link.store(None);
    inner.set_state(ConnectionState::Disconnected);
}

/// Open one session and pump its events until it ends.
async fn run_session<T: Transport>(
    inner: &Inner<T>,
    options: &SessionOptions,
    watchdog: Duration,
    cancel: &CancellationToken,
) -> SessionEnd {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionEnd::Cancelled,
        opened = inner.transport.open(options) => opened,
    };
    let (link, mut events) = match opened {
        Ok(pair) => pair,
        Err(error) => return SessionEnd::Lost { error, acked: false },
    };
    let link = Arc::new(link);
    let mut acked = false;

    let end = loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                inner.link.store(None);
                close_session(&*link, &mut events).await;
                break SessionEnd::Cancelled;
            }
            event = tokio::time::timeout(watchdog, events.next_event()) => event,
        };

        match event {
            Err(_elapsed) => {
                break SessionEnd::Lost {
                    error: teleboard_api::Error::KeepAliveTimeout {
                        timeout_ms: u64::try_from(watchdog.as_millis()).unwrap_or(u64::MAX),
                    },
                    acked,
                };
            }
            Ok(Err(error)) => break SessionEnd::Lost { error, acked },
            Ok(Ok(TransportEvent::ConnAck { session_present })) => {
                acked = true;
                inner.link.store(Some(Arc::clone(&link)));
                if let Err(error) = inner.replay_interest(&link).await {
                    break SessionEnd::Lost { error, acked };
                }
                info!(session_present, "connected to broker");
                inner.set_state(ConnectionState::Connected);
            }
            Ok(Ok(TransportEvent::Message { topic, payload })) => {
                inner.dispatch(topic, payload);
            }
            Ok(Ok(TransportEvent::Heartbeat)) => {}
            Ok(Ok(TransportEvent::Disconnected)) => {
                break SessionEnd::Lost {
                    error: teleboard_api::Error::Closed,
                    acked,
                };
            }
        }
    };

    inner.link.store(None);
    end
}

/// Request a protocol-level disconnect and let the event half flush it.
async fn close_session<L: Link, E: EventSource>(link: &L, events: &mut E) {
    if let Err(e) = link.disconnect().await {
        debug!(error = %e, "disconnect request not delivered");
        return;
    }
    let drained = tokio::time::timeout(DISCONNECT_DRAIN, async {
        loop {
            match events.next_event().await {
                Ok(TransportEvent::Disconnected) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("broker did not confirm disconnect in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "Reconnecting (attempt 3)"
        );
        assert!(ConnectionState::Reconnecting { attempt: 1 }.is_active());
        assert!(!ConnectionState::Failed.is_active());
    }
}
