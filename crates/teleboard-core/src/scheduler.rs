// ── Render scheduling ──
//
// Fixed-period tick: sweep staleness, snapshot the store, publish the frame
// on a `watch` channel. Consumers always see the newest frame; frames they
// were too slow for are simply overwritten, so memory stays bounded no
// matter how slow the renderer is.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::model::RenderFrame;
use crate::store::RenderStateStore;
use crate::stream::FrameStream;

/// The external rendering surface.
pub trait Renderer: Send + 'static {
    fn ingest(&mut self, frame: Arc<RenderFrame>);
}

impl<F> Renderer for F
where
    F: FnMut(Arc<RenderFrame>) + Send + 'static,
{
    fn ingest(&mut self, frame: Arc<RenderFrame>) {
        self(frame);
    }
}

pub struct RenderScheduler {
    store: Arc<RenderStateStore>,
    period: Duration,
    frames: watch::Sender<Arc<RenderFrame>>,
    parent: CancellationToken,
    tasks: Mutex<Tasks>,
}

struct Tasks {
    /// Child of `parent`, replaced after every stop so the scheduler can be
    /// restarted.
    cancel: CancellationToken,
    ticker: Option<JoinHandle<()>>,
    renderers: Vec<JoinHandle<()>>,
}

impl RenderScheduler {
    pub fn new(store: Arc<RenderStateStore>, period: Duration) -> Self {
        Self::with_cancel(store, period, CancellationToken::new())
    }

    pub fn with_cancel(
        store: Arc<RenderStateStore>,
        period: Duration,
        parent: CancellationToken,
    ) -> Self {
        let (frames, _) = watch::channel(Arc::new(RenderFrame::empty()));
        let cancel = parent.child_token();
        Self {
            store,
            period,
            frames,
            parent,
            tasks: Mutex::new(Tasks {
                cancel,
                ticker: None,
                renderers: Vec::new(),
            }),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking. No-op if already running.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if tasks.cancel.is_cancelled() {
            tasks.cancel = self.parent.child_token();
        }

        debug!(period = ?self.period, "render scheduler started");
        tasks.ticker = Some(tokio::spawn(tick_task(
            Arc::clone(&self.store),
            self.frames.clone(),
            self.period,
            tasks.cancel.clone(),
        )));
    }

    /// Halt future ticks and renderer feeds. An in-flight tick always
    /// completes. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = tasks
            .ticker
            .take()
            .into_iter()
            .chain(tasks.renderers.drain(..))
            .collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "render task ended abnormally");
            }
        }
        debug!("render scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .await
            .ticker
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run one tick immediately and return the frame it published.
    pub fn tick(&self) -> Arc<RenderFrame> {
        render_tick(&self.store, &self.frames)
    }

    /// Latest-frame-wins subscription to scheduler output.
    pub fn frames(&self) -> FrameStream {
        FrameStream::new(self.frames.subscribe())
    }

    /// Feed `renderer` from the frame stream until the scheduler stops.
    pub async fn drive<R: Renderer>(&self, renderer: R) {
        let mut tasks = self.tasks.lock().await;
        if tasks.cancel.is_cancelled() {
            tasks.cancel = self.parent.child_token();
        }
        let handle = tokio::spawn(drive_task(renderer, self.frames(), tasks.cancel.clone()));
        tasks.renderers.push(handle);
    }
}

fn render_tick(
    store: &RenderStateStore,
    frames: &watch::Sender<Arc<RenderFrame>>,
) -> Arc<RenderFrame> {
    store.mark_stale_if_expired(Utc::now());
    let frame = Arc::new(store.snapshot());
    frames.send_replace(Arc::clone(&frame));
    trace!(sequence = frame.sequence, channels = frame.snapshot.len(), "frame published");
    frame
}

async fn tick_task(
    store: Arc<RenderStateStore>,
    frames: watch::Sender<Arc<RenderFrame>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                render_tick(&store, &frames);
            }
        }
    }
}

async fn drive_task<R: Renderer>(mut renderer: R, mut frames: FrameStream, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.changed() => {
                let Some(frame) = frame else { break };
                renderer.ingest(frame);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use chrono::DateTime;

    use crate::catalog::{ChannelCatalog, ChannelId, ChannelKind, ChannelSpec};
    use crate::model::{DecodedSample, SampleValue};

    fn store() -> Arc<RenderStateStore> {
        let catalog = ChannelCatalog::new(
            "plant",
            vec![ChannelSpec::new("pump-1", "speed", ChannelKind::Number)],
        )
        .unwrap();
        Arc::new(RenderStateStore::new(
            Arc::new(catalog),
            Duration::from_secs(5),
        ))
    }

    fn sample(value: f64) -> DecodedSample {
        DecodedSample {
            channel_id: ChannelId::new("pump-1", "speed"),
            value: SampleValue::Number(value),
            source_ts: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_publish_increasing_frames() {
        let store = store();
        let scheduler = RenderScheduler::new(Arc::clone(&store), Duration::from_millis(100));
        let mut frames = scheduler.frames();
        assert_eq!(frames.current().sequence, 0);

        scheduler.start().await;
        let first = frames.changed().await.unwrap();

        store.apply(sample(7.0), Utc::now());
        let second = frames.changed().await.unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(
            second.get(&ChannelId::new("pump-1", "speed")).unwrap().latest_value,
            SampleValue::Number(7.0)
        );

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_restartable() {
        let scheduler = RenderScheduler::new(store(), Duration::from_millis(50));
        scheduler.stop().await;

        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        let before = scheduler.frames().latest().sequence;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scheduler.frames().latest().sequence, before);

        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn tick_marks_expired_channels_stale() {
        let store = store();
        let long_ago = DateTime::from_timestamp_millis(1_000).unwrap();
        store.apply(
            DecodedSample {
                channel_id: ChannelId::new("pump-1", "speed"),
                value: SampleValue::Number(1.0),
                source_ts: long_ago,
            },
            long_ago,
        );

        let scheduler = RenderScheduler::new(store, Duration::from_secs(1));
        let frame = scheduler.tick();
        assert!(frame.get(&ChannelId::new("pump-1", "speed")).unwrap().stale);
        assert_eq!(scheduler.frames().latest().sequence, frame.sequence);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_renderer_only_sees_latest_frames() {
        let store = store();
        let scheduler = RenderScheduler::new(Arc::clone(&store), Duration::from_millis(10));
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        scheduler
            .drive(move |frame: Arc<RenderFrame>| sink.lock().unwrap().push(frame.sequence))
            .await;

        // Publish several frames without yielding; the renderer task can
        // only observe the last one.
        for _ in 0..5 {
            scheduler.tick();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.stop().await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![5]);
    }
}
