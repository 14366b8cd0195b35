// ── Channel catalog ──
//
// The known channel namespace. Every inbound topic the decoder accepts and
// every command topic the control publisher writes to is derived from it:
//
//   inbound   <namespace>/<device>/<channel>
//   outbound  <namespace>/<device>/cmd/<channel>

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teleboard_api::TopicFilter;

use crate::error::CoreError;

const COMMAND_LEVEL: &str = "cmd";

// ── ChannelId ────────────────────────────────────────────────────

/// Stable `<device>/<channel>` identifier for a logical data stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(device: &str, channel: &str) -> Self {
        Self(format!("{device}/{channel}"))
    }

    /// Parse a `<device>/<channel>` string.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.split_once('/') {
            Some((device, channel)) if is_plain_level(device) && is_plain_level(channel) => {
                Ok(Self::new(device, channel))
            }
            _ => Err(CoreError::UnknownChannel {
                identifier: raw.to_owned(),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn device(&self) -> &str {
        self.0.split_once('/').map_or(&self.0, |(d, _)| d)
    }

    pub fn channel(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, c)| c)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Channel specs ────────────────────────────────────────────────

/// Declared value type of a channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelKind {
    Number,
    Bool,
    Text,
    Structured,
}

/// Marks a channel writable, with optional numeric bounds for sliders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// One cataloged channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub device: String,
    pub channel: String,
    pub kind: ChannelKind,
    /// Overrides the dashboard-wide staleness threshold.
    pub stale_after: Option<Duration>,
    /// Present when the channel accepts commands.
    pub control: Option<ControlSpec>,
}

impl ChannelSpec {
    pub fn new(device: impl Into<String>, channel: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            device: device.into(),
            channel: channel.into(),
            kind,
            stale_after: None,
            control: None,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_control(mut self, control: ControlSpec) -> Self {
        self.control = Some(control);
        self
    }

    pub fn id(&self) -> ChannelId {
        ChannelId::new(&self.device, &self.channel)
    }

    pub fn is_writable(&self) -> bool {
        self.control.is_some()
    }
}

// ── ChannelCatalog ───────────────────────────────────────────────

/// Validated set of channels under one namespace, indexed by channel id,
/// inbound topic and command topic.
#[derive(Debug, Clone)]
pub struct ChannelCatalog {
    namespace: String,
    channels: Vec<ChannelSpec>,
    by_id: HashMap<ChannelId, usize>,
    by_topic: HashMap<String, usize>,
    by_command_topic: HashMap<String, usize>,
}

impl ChannelCatalog {
    pub fn new(namespace: impl Into<String>, channels: Vec<ChannelSpec>) -> Result<Self, CoreError> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;

        let mut by_id = HashMap::with_capacity(channels.len());
        let mut by_topic = HashMap::with_capacity(channels.len());
        let mut by_command_topic = HashMap::new();

        for (index, spec) in channels.iter().enumerate() {
            for (label, level) in [("device", &spec.device), ("channel", &spec.channel)] {
                if !is_plain_level(level) {
                    return Err(CoreError::Config {
                        message: format!(
                            "{label} name '{level}' must be a single non-empty topic level without wildcards"
                        ),
                    });
                }
            }
            if let Some(ControlSpec {
                min: Some(min),
                max: Some(max),
            }) = spec.control
            {
                if min > max {
                    return Err(CoreError::Config {
                        message: format!("channel {}: control min {min} exceeds max {max}", spec.id()),
                    });
                }
            }

            let id = spec.id();
            if by_id.insert(id.clone(), index).is_some() {
                return Err(CoreError::Config {
                    message: format!("channel {id} is declared twice"),
                });
            }
            by_topic.insert(inbound_topic(&namespace, spec), index);
            if spec.is_writable() {
                by_command_topic.insert(command_topic(&namespace, spec), index);
            }
        }

        Ok(Self {
            namespace,
            channels,
            by_id,
            by_topic,
            by_command_topic,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: &ChannelId) -> Option<&ChannelSpec> {
        self.by_id.get(id).and_then(|&i| self.channels.get(i))
    }

    /// Look up the channel published on an inbound topic.
    pub fn resolve_topic(&self, topic: &str) -> Option<&ChannelSpec> {
        self.by_topic.get(topic).and_then(|&i| self.channels.get(i))
    }

    /// Look up the writable channel addressed by a command topic.
    pub fn resolve_command_topic(&self, topic: &str) -> Option<&ChannelSpec> {
        self.by_command_topic
            .get(topic)
            .and_then(|&i| self.channels.get(i))
    }

    pub fn topic_for(&self, spec: &ChannelSpec) -> String {
        inbound_topic(&self.namespace, spec)
    }

    pub fn command_topic_for(&self, spec: &ChannelSpec) -> String {
        command_topic(&self.namespace, spec)
    }

    /// Single filter covering every inbound channel topic.
    pub fn subscription_filter(&self) -> Result<TopicFilter, CoreError> {
        Ok(TopicFilter::new(format!("{}/+/+", self.namespace))?)
    }

    /// Staleness threshold for a channel, falling back to `default`.
    pub fn stale_after_for(&self, id: &ChannelId, default: Duration) -> Duration {
        self.get(id).and_then(|s| s.stale_after).unwrap_or(default)
    }
}

fn inbound_topic(namespace: &str, spec: &ChannelSpec) -> String {
    format!("{namespace}/{}/{}", spec.device, spec.channel)
}

fn command_topic(namespace: &str, spec: &ChannelSpec) -> String {
    format!("{namespace}/{}/{COMMAND_LEVEL}/{}", spec.device, spec.channel)
}

fn is_plain_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}

fn validate_namespace(namespace: &str) -> Result<(), CoreError> {
    let valid = !namespace.is_empty()
        && !namespace.starts_with('$')
        && namespace.split('/').all(is_plain_level);
    if valid {
        Ok(())
    } else {
        Err(CoreError::Config {
            message: format!(
                "namespace '{namespace}' must be non-empty topic levels without wildcards"
            ),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> ChannelCatalog {
        ChannelCatalog::new(
            "plant",
            vec![
                ChannelSpec::new("pump-1", "speed", ChannelKind::Number).with_control(ControlSpec {
                    min: Some(0.0),
                    max: Some(100.0),
                }),
                ChannelSpec::new("pump-1", "running", ChannelKind::Bool),
                ChannelSpec::new("lidar", "objects", ChannelKind::Structured)
                    .with_stale_after(Duration::from_secs(2)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn resolves_inbound_and_command_topics() {
        let cat = catalog();
        let speed = cat.resolve_topic("plant/pump-1/speed").unwrap();
        assert_eq!(speed.id().as_str(), "pump-1/speed");
        assert_eq!(cat.command_topic_for(speed), "plant/pump-1/cmd/speed");

        assert!(cat.resolve_command_topic("plant/pump-1/cmd/speed").is_some());
        // Read-only channels have no command topic.
        assert!(cat.resolve_command_topic("plant/pump-1/cmd/running").is_none());
        assert!(cat.resolve_topic("plant/pump-2/speed").is_none());
    }

    #[test]
    fn stale_threshold_override() {
        let cat = catalog();
        let default = Duration::from_secs(10);
        assert_eq!(
            cat.stale_after_for(&ChannelId::new("lidar", "objects"), default),
            Duration::from_secs(2)
        );
        assert_eq!(
            cat.stale_after_for(&ChannelId::new("pump-1", "speed"), default),
            default
        );
    }

    #[test]
    fn subscription_filter_covers_all_channels() {
        let filter = catalog().subscription_filter().unwrap();
        assert_eq!(filter.as_str(), "plant/+/+");
        assert!(filter.matches("plant/lidar/objects"));
        assert!(!filter.matches("plant/pump-1/cmd/speed"));
    }

    #[test]
    fn rejects_duplicates_and_wildcards() {
        let dup = ChannelCatalog::new(
            "plant",
            vec![
                ChannelSpec::new("a", "x", ChannelKind::Number),
                ChannelSpec::new("a", "x", ChannelKind::Bool),
            ],
        );
        assert!(dup.is_err());

        let wild = ChannelCatalog::new("plant", vec![ChannelSpec::new("+", "x", ChannelKind::Number)]);
        assert!(wild.is_err());

        assert!(ChannelCatalog::new("", Vec::new()).is_err());
        assert!(ChannelCatalog::new("site/#", Vec::new()).is_err());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let res = ChannelCatalog::new(
            "plant",
            vec![ChannelSpec::new("a", "x", ChannelKind::Number).with_control(ControlSpec {
                min: Some(5.0),
                max: Some(1.0),
            })],
        );
        assert!(res.is_err());
    }

    #[test]
    fn channel_id_parts() {
        let id = ChannelId::parse("pump-1/speed").unwrap();
        assert_eq!(id.device(), "pump-1");
        assert_eq!(id.channel(), "speed");
        assert!(ChannelId::parse("pump-1").is_err());
        assert!(ChannelId::parse("a/b/c").is_err());
    }
}
