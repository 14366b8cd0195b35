//! Broker-facing layer for teleboard.
//!
//! - **[`Transport`]** / **[`Link`]** / **[`EventSource`]**: the seam the
//!   streaming core drives. A transport opens one session at a time and
//!   returns an outbound link plus an inbound event source.
//! - **[`MqttTransport`]**: the production implementation on top of
//!   `rumqttc`, with optional TLS.
//! - **[`TopicFilter`]**: validated MQTT filters with `+`/`#` matching.
//! - **[`SampleEnvelope`]** / **[`CommandEnvelope`]**: JSON wire shapes.

pub mod error;
pub mod mqtt;
pub mod payload;
pub mod topic;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::Error;
pub use mqtt::MqttTransport;
pub use payload::{CommandEnvelope, SampleEnvelope};
pub use topic::{TopicFilter, validate_topic_name};
pub use transport::{
    Credentials, EventSource, Link, MIN_KEEP_ALIVE, QoS, SessionOptions, TlsMode, Transport,
    TransportEvent,
};
