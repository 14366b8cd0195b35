// ── Control publishing ──
//
// Turns user control events into command messages. Commands are validated
// against the catalog, then published exactly once; nothing is queued for
// later and nothing is retried. A disconnected broker is reported to the
// caller straight away.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use teleboard_api::{CommandEnvelope, QoS, Transport};

use crate::catalog::{ChannelCatalog, ChannelId, ChannelKind, ChannelSpec};
use crate::connection::ConnectionManager;
use crate::error::CoreError;
use crate::model::{ControlCommand, SampleValue};

const CONTROL_QUEUE_SIZE: usize = 64;

// ── Queue types ──────────────────────────────────────────────────

/// A command plus the channel its outcome is reported on.
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: oneshot::Sender<Result<(), CoreError>>,
}

/// Sending half of the control queue, handed to UI widgets.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    /// A handle whose queue is already closed; every send reports
    /// `NotConnected`.
    pub fn closed() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Queue `command` and wait for the publish outcome.
    pub async fn send(&self, command: ControlCommand) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| CoreError::NotConnected)?;
        rx.await.map_err(|_| CoreError::NotConnected)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── ControlPublisher ─────────────────────────────────────────────

pub struct ControlPublisher<T: Transport> {
    connection: ConnectionManager<T>,
    catalog: Arc<ChannelCatalog>,
    qos: QoS,
}

impl<T: Transport> ControlPublisher<T> {
    pub fn new(connection: ConnectionManager<T>, catalog: Arc<ChannelCatalog>, qos: QoS) -> Self {
        Self {
            connection,
            catalog,
            qos,
        }
    }

    /// Build a command for a cataloged, writable channel.
    pub fn command_for(
        &self,
        channel: &ChannelId,
        value: impl Into<SampleValue>,
    ) -> Result<ControlCommand, CoreError> {
        let spec = self
            .catalog
            .get(channel)
            .ok_or_else(|| CoreError::UnknownChannel {
                identifier: channel.to_string(),
            })?;
        if !spec.is_writable() {
            return Err(CoreError::validation(format!(
                "channel {channel} does not accept commands"
            )));
        }
        Ok(ControlCommand::new(self.catalog.command_topic_for(spec), value))
    }

    /// Validate and publish one command.
    pub async fn submit(&self, command: ControlCommand) -> Result<(), CoreError> {
        let spec = self
            .catalog
            .resolve_command_topic(&command.command_topic)
            .ok_or_else(|| CoreError::UnknownChannel {
                identifier: command.command_topic.clone(),
            })?;
        validate_value(spec, &command.payload.value)?;

        if !self.connection.state().is_connected() {
            return Err(CoreError::NotConnected);
        }

        let payload = CommandEnvelope {
            value: command.payload.value.to_json(),
            ts: command.payload.ts,
        }
        .encode()?;

        self.connection
            .publish(&command.command_topic, payload, self.qos)
            .await?;
        info!(
            topic = %command.command_topic,
            value = %command.payload.value,
            "control command published"
        );
        Ok(())
    }

    /// Spawn the queue consumer. The task ends when `cancel` fires or every
    /// handle has been dropped.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> (ControlHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        let handle = tokio::spawn(control_task(self, rx, cancel));
        (ControlHandle { tx }, handle)
    }
}

async fn control_task<T: Transport>(
    publisher: Arc<ControlPublisher<T>>,
    mut rx: mpsc::Receiver<ControlRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = rx.recv() => {
                let Some(request) = request else { break };
                let result = publisher.submit(request.command).await;
                if let Err(ref e) = result {
                    debug!(error = %e, "control command rejected");
                }
                let _ = request.reply.send(result);
            }
        }
    }
}

fn validate_value(spec: &ChannelSpec, value: &SampleValue) -> Result<(), CoreError> {
    let id = spec.id();
    if !value.is_scalar() {
        return Err(CoreError::validation(format!(
            "channel {id} only accepts scalar commands"
        )));
    }
    if value.kind() != spec.kind {
        return Err(CoreError::validation(format!(
            "channel {id} expects a {} value, got {}",
            spec.kind,
            value.kind()
        )));
    }

    if let (ChannelKind::Number, Some(n)) = (spec.kind, value.as_f64()) {
        if !n.is_finite() {
            return Err(CoreError::validation(format!(
                "channel {id} requires a finite number"
            )));
        }
        let bounds = spec.control.unwrap_or_default();
        if let Some(min) = bounds.min.filter(|&min| n < min) {
            return Err(CoreError::validation(format!(
                "{n} is below the minimum {min} for {id}"
            )));
        }
        if let Some(max) = bounds.max.filter(|&max| n > max) {
            return Err(CoreError::validation(format!(
                "{n} is above the maximum {max} for {id}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::ControlSpec;
    use crate::router::TopicRouter;
    use teleboard_api::mock::MockTransport;

    fn catalog() -> Arc<ChannelCatalog> {
        Arc::new(
            ChannelCatalog::new(
                "plant",
                vec![
                    ChannelSpec::new("pump-1", "speed", ChannelKind::Number).with_control(
                        ControlSpec {
                            min: Some(0.0),
                            max: Some(100.0),
                        },
                    ),
                    ChannelSpec::new("pump-1", "enabled", ChannelKind::Bool)
                        .with_control(ControlSpec::default()),
                    ChannelSpec::new("pump-1", "temp", ChannelKind::Number),
                ],
            )
            .unwrap(),
        )
    }

    fn publisher(broker: &MockTransport) -> ControlPublisher<MockTransport> {
        let connection = ConnectionManager::new(broker.clone(), Arc::new(TopicRouter::new()));
        ControlPublisher::new(connection, catalog(), QoS::AtLeastOnce)
    }

    #[test]
    fn command_for_resolves_command_topic() {
        let broker = MockTransport::new();
        let p = publisher(&broker);
        let cmd = p
            .command_for(&ChannelId::new("pump-1", "speed"), 12.5)
            .unwrap();
        assert_eq!(cmd.command_topic, "plant/pump-1/cmd/speed");

        let err = p
            .command_for(&ChannelId::new("pump-1", "temp"), 1.0)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let err = p
            .command_for(&ChannelId::new("pump-9", "speed"), 1.0)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownChannel { .. }));
    }

    #[tokio::test]
    async fn validation_runs_before_connection_check() {
        let broker = MockTransport::new();
        let p = publisher(&broker);

        let err = p
            .submit(ControlCommand::new("plant/pump-1/cmd/speed", 150.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref message } if message.contains("maximum")));

        let err = p
            .submit(ControlCommand::new("plant/pump-1/cmd/enabled", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let err = p
            .submit(ControlCommand::new("plant/pump-1/cmd/speed", f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let err = p
            .submit(ControlCommand::new("plant/pump-1/cmd/temp", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownChannel { .. }));
    }

    #[tokio::test]
    async fn disconnected_submit_fails_fast_without_publishing() {
        let broker = MockTransport::new();
        let p = publisher(&broker);

        let err = p
            .submit(ControlCommand::new("plant/pump-1/cmd/speed", 50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
        assert!(broker.published().is_empty());
        assert_eq!(broker.open_count(), 0);
    }

    #[tokio::test]
    async fn closed_handle_reports_not_connected() {
        let handle = ControlHandle::closed();
        assert!(handle.is_closed());
        let err = handle
            .send(ControlCommand::new("plant/pump-1/cmd/speed", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[tokio::test]
    async fn queue_replies_with_submit_result() {
        let broker = MockTransport::new();
        let p = Arc::new(publisher(&broker));
        let cancel = CancellationToken::new();
        let (handle, task) = Arc::clone(&p).spawn(cancel.clone());

        let err = handle
            .send(ControlCommand::new("plant/pump-1/cmd/speed", 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));

        cancel.cancel();
        task.await.unwrap();
        assert!(handle.send(ControlCommand::new("plant/pump-1/cmd/speed", 10.0)).await.is_err());
    }
}
