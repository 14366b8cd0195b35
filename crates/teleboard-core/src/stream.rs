// ── Reactive snapshot streams ──
//
// Subscription types for consuming store changes and render frames.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{ChannelMap, RenderFrame};

/// Change-driven view of the render state store.
pub type StateStream = SnapshotStream<ChannelMap>;

/// Latest-frame-wins view of the scheduler output.
pub type FrameStream = SnapshotStream<RenderFrame>;

/// A subscription to a shared, immutable snapshot.
///
/// Provides both point-in-time access and reactive change notification
/// via [`changed()`](Self::changed) or by converting to a `Stream`.
/// Intermediate values are skipped when the consumer is slower than the
/// producer; only the newest snapshot is ever delivered.
pub struct SnapshotStream<T: Send + Sync + 'static> {
    current: Arc<T>,
    receiver: watch::Receiver<Arc<T>>,
}

impl<T: Send + Sync + 'static> SnapshotStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<T>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at creation time (or at the last
    /// [`changed()`](Self::changed)).
    pub fn current(&self) -> &Arc<T> {
        &self.current
    }

    /// Get the latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the producer has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotWatchStream<T> {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields the current snapshot first, then a new one each time the
/// producer publishes.
pub struct SnapshotWatchStream<T: Send + Sync + 'static> {
    inner: WatchStream<Arc<T>>,
}

impl<T: Send + Sync + 'static> Stream for SnapshotWatchStream<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn changed_skips_to_latest() {
        let (tx, rx) = watch::channel(Arc::new(0_u32));
        let mut stream = SnapshotStream::new(rx);
        assert_eq!(**stream.current(), 0);

        tx.send_replace(Arc::new(1));
        tx.send_replace(Arc::new(2));
        assert_eq!(*stream.changed().await.unwrap(), 2);
        assert_eq!(**stream.current(), 2);

        drop(tx);
        assert!(stream.changed().await.is_none());
    }

    #[tokio::test]
    async fn into_stream_yields_current_then_updates() {
        let (tx, rx) = watch::channel(Arc::new("a"));
        let mut stream = SnapshotStream::new(rx).into_stream();

        assert_eq!(*stream.next().await.unwrap(), "a");
        tx.send_replace(Arc::new("b"));
        assert_eq!(*stream.next().await.unwrap(), "b");
    }
}
