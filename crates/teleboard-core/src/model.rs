// ── Domain model ──
//
// Values flowing through the pipeline: raw deliveries, decoded samples,
// per-channel render state, frames handed to the renderer, and commands
// going back upstream.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{ChannelId, ChannelKind};

/// A single broker delivery, consumed synchronously by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

// ── Values ───────────────────────────────────────────────────────

/// Typed channel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Structured(serde_json::Map<String, serde_json::Value>),
}

impl SampleValue {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Bool(_) => ChannelKind::Bool,
            Self::Number(_) => ChannelKind::Number,
            Self::Text(_) => ChannelKind::Text,
            Self::Structured(_) => ChannelKind::Structured,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Structured(_))
    }

    /// JSON form used on the wire.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Structured(map) => serde_json::Value::Object(map.clone()),
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Structured(map) => write!(f, "{}", serde_json::Value::Object(map.clone())),
        }
    }
}

impl From<f64> for SampleValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for SampleValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for SampleValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SampleValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub channel_id: ChannelId,
    pub value: SampleValue,
    pub source_ts: DateTime<Utc>,
}

// ── Render state ─────────────────────────────────────────────────

/// Latest known value of one channel, as shown to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub latest_value: SampleValue,
    /// Timestamp the device attached to the sample.
    pub source_ts: DateTime<Utc>,
    /// Local arrival time of the sample.
    pub last_updated: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub stale_after: Duration,
    /// Set by the staleness sweep; cleared by the next applied sample.
    pub stale: bool,
    /// Samples applied since the channel first appeared.
    pub update_count: u64,
    /// Smoothed arrival rate of applied samples.
    pub rate_hz: f64,
}

impl ChannelState {
    /// Age of the value relative to `now`, by arrival time.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_updated).to_std().unwrap_or_default()
    }
}

/// Channel id → state, shared copy-on-write between the store and frames.
pub type ChannelMap = BTreeMap<ChannelId, ChannelState>;

/// Immutable snapshot handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    /// Monotonic per-producer frame counter; 0 is the empty initial frame.
    pub sequence: u64,
    pub snapshot: Arc<ChannelMap>,
    pub generated_at: DateTime<Utc>,
}

impl RenderFrame {
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            snapshot: Arc::new(ChannelMap::new()),
            generated_at: Utc::now(),
        }
    }

    pub fn get(&self, id: &ChannelId) -> Option<&ChannelState> {
        self.snapshot.get(id)
    }

    pub fn stale_count(&self) -> usize {
        self.snapshot.values().filter(|s| s.stale).count()
    }
}

// ── Commands ─────────────────────────────────────────────────────

/// Wire payload of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload {
    pub value: SampleValue,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// A user-issued command bound for a device.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub command_topic: String,
    pub payload: CommandPayload,
    pub issued_at: DateTime<Utc>,
}

impl ControlCommand {
    /// Build a command stamped with the current time.
    pub fn new(command_topic: impl Into<String>, value: impl Into<SampleValue>) -> Self {
        let issued_at = Utc::now();
        Self {
            command_topic: command_topic.into(),
            payload: CommandPayload {
                value: value.into(),
                ts: issued_at.timestamp_millis(),
            },
            issued_at,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_kinds() {
        assert_eq!(SampleValue::from(1.5).kind(), ChannelKind::Number);
        assert_eq!(SampleValue::from(true).kind(), ChannelKind::Bool);
        assert_eq!(SampleValue::from("on").kind(), ChannelKind::Text);
        assert!(!SampleValue::Structured(serde_json::Map::new()).is_scalar());
    }

    #[test]
    fn values_serialize_untagged() {
        assert_eq!(serde_json::to_value(SampleValue::Number(42.0)).unwrap(), json!(42.0));
        assert_eq!(serde_json::to_value(SampleValue::Bool(false)).unwrap(), json!(false));
        assert_eq!(SampleValue::Number(12.5).to_json(), json!(12.5));
    }

    #[test]
    fn command_is_stamped_with_issue_time() {
        let cmd = ControlCommand::new("plant/pump-1/cmd/speed", 40.0);
        assert_eq!(cmd.payload.ts, cmd.issued_at.timestamp_millis());
        assert_eq!(cmd.payload.value, SampleValue::Number(40.0));
    }

    #[test]
    fn empty_frame_has_sequence_zero() {
        let frame = RenderFrame::empty();
        assert_eq!(frame.sequence, 0);
        assert!(frame.snapshot.is_empty());
        assert_eq!(frame.stale_count(), 0);
    }
}
