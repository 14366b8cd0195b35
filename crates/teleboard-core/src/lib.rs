// teleboard-core: Streaming pipeline between the broker and the renderer.
//
//   ConnectionManager → TopicRouter → MessageDecoder → RenderStateStore
//                                                        → RenderScheduler → Renderer
//   ControlHandle → ControlPublisher → ConnectionManager → broker

pub mod catalog;
pub mod config;
pub mod connection;
pub mod control;
pub mod dashboard;
pub mod decoder;
pub mod error;
pub mod model;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use catalog::{ChannelCatalog, ChannelId, ChannelKind, ChannelSpec, ControlSpec};
pub use config::{BrokerConfig, DashboardConfig, ReconnectPolicy, RenderConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStats};
pub use control::{ControlHandle, ControlPublisher, ControlRequest};
pub use dashboard::Dashboard;
pub use decoder::MessageDecoder;
pub use error::{CoreError, DecodeError};
pub use router::{DispatchOutcome, MessageHandler, StoreSink, SubscriptionId, TopicRouter};
pub use scheduler::{RenderScheduler, Renderer};
pub use store::RenderStateStore;
pub use stream::{FrameStream, SnapshotStream, StateStream};

pub use model::{
    ChannelMap, ChannelState, CommandPayload, ControlCommand, DecodedSample, InboundMessage,
    RenderFrame, SampleValue,
};

// Transport types consumers need to build a dashboard.
pub use teleboard_api::{Credentials, MqttTransport, QoS, TopicFilter, Transport};
