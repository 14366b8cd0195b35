// End-to-end tests for `Dashboard`: broker → router → decoder → store →
// scheduler, and control commands back out.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use teleboard_api::mock::MockTransport;
use teleboard_core::{
    BrokerConfig, ChannelCatalog, ChannelId, ChannelKind, ChannelSpec, ConnectionState,
    ControlCommand, ControlSpec, CoreError, Dashboard, DashboardConfig, FrameStream,
    ReconnectPolicy, RenderConfig, RenderFrame, SampleValue,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn dashboard_config() -> DashboardConfig {
    let mut broker = BrokerConfig::new("mqtt://mock.local".parse().unwrap(), "dash-e2e");
    broker.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        jitter: 0.0,
        max_retries: None,
    };

    let catalog = ChannelCatalog::new(
        "plant",
        vec![
            ChannelSpec::new("pump-1", "speed", ChannelKind::Number).with_control(ControlSpec {
                min: Some(0.0),
                max: Some(100.0),
            }),
            ChannelSpec::new("pump-1", "running", ChannelKind::Bool),
        ],
    )
    .unwrap();

    DashboardConfig {
        broker,
        render: RenderConfig {
            tick_period: Duration::from_millis(10),
            default_stale_after: Duration::from_secs(60),
        },
        catalog,
    }
}

async fn started() -> (MockTransport, Dashboard<MockTransport>) {
    let broker = MockTransport::new();
    let dashboard = Dashboard::build(dashboard_config(), broker.clone()).unwrap();
    dashboard.start().await.unwrap();

    let mut state = dashboard.connection_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected()))
        .await
        .expect("dashboard never connected")
        .unwrap();
    (broker, dashboard)
}

async fn frame_where(
    frames: &mut FrameStream,
    mut pred: impl FnMut(&RenderFrame) -> bool,
) -> Arc<RenderFrame> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = frames.changed().await.expect("scheduler dropped");
            if pred(&frame) {
                return frame;
            }
        }
    })
    .await
    .expect("no matching frame")
}

fn speed() -> ChannelId {
    ChannelId::new("pump-1", "speed")
}

// ── Inbound ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sample_reaches_render_frames() {
    let (broker, dashboard) = started().await;
    assert_eq!(broker.active_filters(), vec!["plant/+/+".to_string()]);

    let mut frames = dashboard.frames();
    assert!(broker.deliver(
        "plant/pump-1/speed",
        json!({"value": 42, "ts": 1_690_000_000_000_i64}).to_string()
    ));

    let frame = frame_where(&mut frames, |f| f.get(&speed()).is_some()).await;
    let state = frame.get(&speed()).unwrap();
    assert_eq!(state.latest_value, SampleValue::Number(42.0));
    assert_eq!(state.source_ts.timestamp_millis(), 1_690_000_000_000);
    assert!(!state.stale);

    dashboard.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_leaves_store_unchanged() {
    let (broker, dashboard) = started().await;
    let mut frames = dashboard.frames();

    broker.deliver(
        "plant/pump-1/speed",
        json!({"value": 5, "ts": 1_000}).to_string(),
    );
    frame_where(&mut frames, |f| f.get(&speed()).is_some()).await;

    broker.deliver("plant/pump-1/speed", r#"{"bogus": true}"#);
    broker.deliver("plant/pump-1/speed", json!({"value": 4, "ts": 999}).to_string());
    broker.deliver("plant/pump-9/speed", json!({"value": 1, "ts": 2_000}).to_string());
    broker.deliver("plant/pump-1/running", json!({"value": true, "ts": 2_000}).to_string());

    let running = ChannelId::new("pump-1", "running");
    let frame = frame_where(&mut frames, |f| f.get(&running).is_some()).await;
    assert_eq!(frame.snapshot.len(), 2);
    let state = frame.get(&speed()).unwrap();
    assert_eq!(state.latest_value, SampleValue::Number(5.0));
    assert_eq!(state.update_count, 1);

    let stats = dashboard.stats();
    assert_eq!(stats.messages_received, 5);
    assert_eq!(stats.handler_failures, 2, "bogus payload and unknown device");

    dashboard.stop().await;
}

#[tokio::test]
async fn test_renderer_keeps_receiving_after_reconnect() {
    let (broker, dashboard) = started().await;
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    dashboard
        .drive(move |frame: Arc<RenderFrame>| {
            if let Some(state) = frame.get(&ChannelId::new("pump-1", "speed")) {
                sink.lock().unwrap().push(state.latest_value.clone());
            }
        })
        .await;

    let mut state = dashboard.connection_state();
    broker.drop_connection();
    state.wait_for(|s| !s.is_connected()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    assert!(broker.deliver(
        "plant/pump-1/speed",
        json!({"value": 77, "ts": 5_000}).to_string()
    ));
    let mut frames = dashboard.frames();
    frame_where(&mut frames, |f| f.get(&speed()).is_some()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(values.lock().unwrap().contains(&SampleValue::Number(77.0)));
    dashboard.stop().await;
}

// ── Control ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_control_command_is_published_once() {
    let (broker, dashboard) = started().await;
    let command = dashboard
        .publisher()
        .command_for(&speed(), 12.5)
        .unwrap();
    let ts = command.payload.ts;

    dashboard.control().send(command).await.unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "plant/pump-1/cmd/speed");
    let body: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(body, json!({"value": 12.5, "ts": ts}));

    dashboard.stop().await;
}

#[tokio::test]
async fn test_out_of_bounds_command_is_rejected_before_publishing() {
    let (broker, dashboard) = started().await;
    let err = dashboard
        .control()
        .send(ControlCommand::new("plant/pump-1/cmd/speed", 101.0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert!(broker.published().is_empty());
    dashboard.stop().await;
}

#[tokio::test]
async fn test_control_before_start_and_after_stop_is_not_connected() {
    let broker = MockTransport::new();
    let dashboard = Dashboard::build(dashboard_config(), broker.clone()).unwrap();
    let command = ControlCommand::new("plant/pump-1/cmd/speed", 10.0);

    let err = dashboard.control().send(command.clone()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotConnected));

    dashboard.start().await.unwrap();
    dashboard.stop().await;
    dashboard.stop().await;

    assert_eq!(
        *dashboard.connection_state().borrow(),
        ConnectionState::Disconnected
    );
    let err = dashboard.control().send(command).await.unwrap_err();
    assert!(matches!(err, CoreError::NotConnected));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_scheduler_keeps_ticking_while_disconnected() {
    let (broker, dashboard) = started().await;
    broker.deliver("plant/pump-1/speed", json!({"value": 3, "ts": 1_000}).to_string());
    let mut frames = dashboard.frames();
    frame_where(&mut frames, |f| f.get(&speed()).is_some()).await;

    broker.refuse_all(true);
    broker.drop_connection();
    let mut state = dashboard.connection_state();
    state.wait_for(|s| !s.is_connected()).await.unwrap();

    let before = frames.latest().sequence;
    let later = frame_where(&mut frames, |f| f.sequence > before + 2).await;
    assert_eq!(
        later.get(&speed()).unwrap().latest_value,
        SampleValue::Number(3.0),
        "last known value stays visible while the broker is unreachable"
    );
    dashboard.stop().await;
}
