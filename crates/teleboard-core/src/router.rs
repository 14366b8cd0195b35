// ── Topic routing ──
//
// Maps topic filters to handlers. The subscription table is an immutable
// `Vec` behind an `ArcSwap`: dispatch loads it without locking, and
// registration publishes a new table. Writers serialize on a mutex so
// concurrent registrations never lose each other's entries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{debug, trace, warn};

use teleboard_api::TopicFilter;

use crate::decoder::MessageDecoder;
use crate::error::CoreError;
use crate::model::InboundMessage;
use crate::store::RenderStateStore;

// ── Handler trait ────────────────────────────────────────────────

/// Receives every inbound message whose topic matches the filter it was
/// registered under. Runs on the connection task; must not block.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &InboundMessage) -> Result<(), CoreError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) -> Result<(), CoreError> + Send + Sync + 'static,
{
    fn handle(&self, message: &InboundMessage) -> Result<(), CoreError> {
        self(message)
    }
}

/// Handle returned by [`TopicRouter::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a single dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers whose filter matched the topic.
    pub matched: usize,
    /// Of those, how many returned an error.
    pub failed: usize,
}

impl DispatchOutcome {
    pub fn is_unmatched(&self) -> bool {
        self.matched == 0
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    pattern: TopicFilter,
    handler: Arc<dyn MessageHandler>,
}

// ── TopicRouter ──────────────────────────────────────────────────

pub struct TopicRouter {
    subscriptions: ArcSwap<Vec<Subscription>>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            subscriptions: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` under `pattern`.
    ///
    /// Registering the same (pattern, handler) pair again is a no-op that
    /// returns the existing id; handler identity is the `Arc` pointer.
    pub fn register(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, CoreError> {
        let pattern = TopicFilter::new(pattern)?;
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.subscriptions.load();
        if let Some(existing) = current
            .iter()
            .find(|s| s.pattern == pattern && Arc::ptr_eq(&s.handler, &handler))
        {
            return Ok(existing.id);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut next: Vec<Subscription> = current.iter().cloned().collect();
        debug!(%id, pattern = %pattern, "handler registered");
        next.push(Subscription {
            id,
            pattern,
            handler,
        });
        self.subscriptions.store(Arc::new(next));
        Ok(id)
    }

    /// Remove a registration. Returns whether it existed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.subscriptions.load();
        if !current.iter().any(|s| s.id == id) {
            return false;
        }
        let next: Vec<Subscription> = current
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .collect();
        self.subscriptions.store(Arc::new(next));
        debug!(%id, "handler unregistered");
        true
    }

    /// Invoke every matching handler, in registration order.
    ///
    /// Handler errors are logged and counted; they never stop the remaining
    /// handlers. Messages nobody listens to are dropped silently.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        let subscriptions = self.subscriptions.load();
        let mut outcome = DispatchOutcome::default();

        for sub in subscriptions
            .iter()
            .filter(|s| s.pattern.matches(&message.topic))
        {
            outcome.matched += 1;
            if let Err(e) = sub.handler.handle(message) {
                outcome.failed += 1;
                match e {
                    CoreError::Decode(ref decode) => {
                        debug!(subscription = %sub.id, error = %decode, "dropping undecodable message");
                    }
                    ref other => {
                        warn!(subscription = %sub.id, topic = %message.topic, error = %other, "message handler failed");
                    }
                }
            }
        }

        if outcome.is_unmatched() {
            trace!(topic = %message.topic, "no handler for topic");
        }
        outcome
    }

    /// Distinct registered filters, in first-registration order.
    pub fn patterns(&self) -> Vec<TopicFilter> {
        let mut patterns: Vec<TopicFilter> = Vec::new();
        for sub in self.subscriptions.load().iter() {
            if !patterns.contains(&sub.pattern) {
                patterns.push(sub.pattern.clone());
            }
        }
        patterns
    }

    pub fn len(&self) -> usize {
        self.subscriptions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.load().is_empty()
    }
}

// ── StoreSink ────────────────────────────────────────────────────

/// Handler that decodes a message and applies it to the store as one
/// synchronous unit.
pub struct StoreSink {
    decoder: MessageDecoder,
    store: Arc<RenderStateStore>,
}

impl StoreSink {
    pub fn new(decoder: MessageDecoder, store: Arc<RenderStateStore>) -> Self {
        Self { decoder, store }
    }
}

impl MessageHandler for StoreSink {
    fn handle(&self, message: &InboundMessage) -> Result<(), CoreError> {
        let sample = self.decoder.decode(message)?;
        self.store.apply(sample, message.received_at);
        Ok(())
    }
}
