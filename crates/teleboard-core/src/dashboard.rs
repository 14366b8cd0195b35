// ── Dashboard composition root ──
//
// Builds every component in dependency order and exposes the explicit
// start/stop lifecycle. Nothing here is global: each `Dashboard` owns one
// connection, one store and one scheduler.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use teleboard_api::Transport;

use crate::catalog::ChannelCatalog;
use crate::config::DashboardConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStats};
use crate::control::{ControlHandle, ControlPublisher};
use crate::decoder::MessageDecoder;
use crate::error::CoreError;
use crate::router::{StoreSink, TopicRouter};
use crate::scheduler::{RenderScheduler, Renderer};
use crate::store::RenderStateStore;
use crate::stream::FrameStream;

/// The assembled streaming core.
pub struct Dashboard<T: Transport> {
    config: DashboardConfig,
    catalog: Arc<ChannelCatalog>,
    store: Arc<RenderStateStore>,
    router: Arc<TopicRouter>,
    connection: ConnectionManager<T>,
    scheduler: RenderScheduler,
    publisher: Arc<ControlPublisher<T>>,
    /// Root of every task this dashboard spawns.
    cancel: CancellationToken,
    control_handle: StdMutex<ControlHandle>,
    control_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<T: Transport> Dashboard<T> {
    /// Construct the pipeline. Does NOT connect -- call
    /// [`start()`](Self::start).
    pub fn build(config: DashboardConfig, transport: T) -> Result<Self, CoreError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let catalog = Arc::new(config.catalog.clone());

        // Leaves: decoder and store.
        let decoder = MessageDecoder::new(Arc::clone(&catalog));
        let store = Arc::new(RenderStateStore::new(
            Arc::clone(&catalog),
            config.render.default_stale_after,
        ));

        // Router, fed by decode → apply.
        let router = Arc::new(TopicRouter::new());
        let filter = catalog.subscription_filter()?;
        router.register(
            filter.as_str(),
            Arc::new(StoreSink::new(decoder, Arc::clone(&store))),
        )?;

        let connection =
            ConnectionManager::with_cancel(transport, Arc::clone(&router), cancel.child_token());
        let publisher = Arc::new(ControlPublisher::new(
            connection.clone(),
            Arc::clone(&catalog),
            config.broker.command_qos,
        ));
        let scheduler = RenderScheduler::with_cancel(
            Arc::clone(&store),
            config.render.tick_period,
            cancel.child_token(),
        );

        Ok(Self {
            config,
            catalog,
            store,
            router,
            connection,
            scheduler,
            publisher,
            cancel,
            control_handle: StdMutex::new(ControlHandle::closed()),
            control_task: Mutex::new(None),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Subscribe to the catalog, connect, and start rendering and the
    /// control queue. Calling it on a running dashboard is harmless.
    pub async fn start(&self) -> Result<(), CoreError> {
        for filter in self.router.patterns() {
            self.connection
                .subscribe(filter.as_str(), self.config.broker.subscribe_qos)
                .await?;
        }
        self.connection.connect(self.config.broker.clone()).await?;
        self.scheduler.start().await;

        let mut control = self.control_task.lock().await;
        if control.as_ref().is_none_or(|(_, h)| h.is_finished()) {
            let token = self.cancel.child_token();
            let (handle, task) = Arc::clone(&self.publisher).spawn(token.clone());
            *self
                .control_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = handle;
            *control = Some((token, task));
        }

        info!(
            namespace = self.catalog.namespace(),
            channels = self.catalog.len(),
            "dashboard started"
        );
        Ok(())
    }

    /// Disconnect and stop every background task. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.connection.disconnect().await;
        self.scheduler.stop().await;

        if let Some((token, task)) = self.control_task.lock().await.take() {
            token.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "control task ended abnormally");
            }
            info!("dashboard stopped");
        }
    }

    /// Feed a renderer from the frame stream (until [`stop()`](Self::stop)).
    pub async fn drive<R: Renderer>(&self, renderer: R) {
        self.scheduler.drive(renderer).await;
    }

    // ── Renderer / UI surface ────────────────────────────────────

    pub fn frames(&self) -> FrameStream {
        self.scheduler.frames()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    /// Queue for control commands. The handle is bound to the current
    /// start/stop cycle; before `start()` and after `stop()` every send
    /// reports `NotConnected`.
    pub fn control(&self) -> ControlHandle {
        self.control_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    // ── Component access ─────────────────────────────────────────

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ChannelCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<RenderStateStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    pub fn publisher(&self) -> &Arc<ControlPublisher<T>> {
        &self.publisher
    }
}

impl<T: Transport> Drop for Dashboard<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
