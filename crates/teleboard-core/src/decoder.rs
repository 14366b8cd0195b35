// ── Message decoding ──
//
// Pure translation from a raw delivery into a `DecodedSample`. The topic
// picks the channel out of the catalog; the channel's declared kind
// decides which JSON values are acceptable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use teleboard_api::SampleEnvelope;

use crate::catalog::{ChannelCatalog, ChannelKind, ChannelSpec};
use crate::error::DecodeError;
use crate::model::{DecodedSample, InboundMessage, SampleValue};

/// Decodes inbound payloads against the channel catalog.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    catalog: Arc<ChannelCatalog>,
}

impl MessageDecoder {
    pub fn new(catalog: Arc<ChannelCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ChannelCatalog {
        &self.catalog
    }

    /// Decode one message. Has no side effects.
    pub fn decode(&self, message: &InboundMessage) -> Result<DecodedSample, DecodeError> {
        let spec = self
            .catalog
            .resolve_topic(&message.topic)
            .ok_or_else(|| DecodeError::UnknownChannel {
                topic: message.topic.clone(),
            })?;

        let malformed = |reason: String| DecodeError::MalformedPayload {
            topic: message.topic.clone(),
            reason,
        };

        if std::str::from_utf8(&message.payload).is_err() {
            return Err(malformed("payload is not valid UTF-8".into()));
        }
        let envelope =
            SampleEnvelope::from_slice(&message.payload).map_err(|e| malformed(e.to_string()))?;

        let source_ts = parse_timestamp(envelope.ts)
            .ok_or_else(|| malformed(format!("timestamp {} is out of range", envelope.ts)))?;
        let value = typed_value(spec, envelope.value).map_err(malformed)?;

        Ok(DecodedSample {
            channel_id: spec.id(),
            value,
            source_ts,
        })
    }
}

fn parse_timestamp(millis: i64) -> Option<DateTime<Utc>> {
    if millis < 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

fn typed_value(spec: &ChannelSpec, value: Value) -> Result<SampleValue, String> {
    match (spec.kind, value) {
        (ChannelKind::Number, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(SampleValue::Number)
            .ok_or_else(|| format!("number {n} is not representable")),
        (ChannelKind::Bool, Value::Bool(b)) => Ok(SampleValue::Bool(b)),
        (ChannelKind::Text, Value::String(s)) => Ok(SampleValue::Text(s)),
        (ChannelKind::Structured, Value::Object(map)) => Ok(SampleValue::Structured(map)),
        (kind, other) => Err(format!(
            "expected a {kind} value, got {}",
            json_type_name(&other)
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{ChannelId, ChannelSpec};
    use pretty_assertions::assert_eq;

    fn decoder() -> MessageDecoder {
        let catalog = ChannelCatalog::new(
            "plant",
            vec![
                ChannelSpec::new("pump-1", "speed", ChannelKind::Number),
                ChannelSpec::new("pump-1", "running", ChannelKind::Bool),
                ChannelSpec::new("pump-1", "mode", ChannelKind::Text),
                ChannelSpec::new("lidar", "objects", ChannelKind::Structured),
            ],
        )
        .unwrap();
        MessageDecoder::new(Arc::new(catalog))
    }

    fn message(topic: &str, payload: &'static [u8]) -> InboundMessage {
        InboundMessage::new(topic, payload)
    }

    #[test]
    fn decodes_numeric_sample() {
        let sample = decoder()
            .decode(&message(
                "plant/pump-1/speed",
                br#"{"value": 42, "ts": 1690000000000}"#,
            ))
            .unwrap();
        assert_eq!(sample.channel_id, ChannelId::new("pump-1", "speed"));
        assert_eq!(sample.value, SampleValue::Number(42.0));
        assert_eq!(sample.source_ts.timestamp_millis(), 1_690_000_000_000);
    }

    #[test]
    fn decodes_structured_sample() {
        let sample = decoder()
            .decode(&message(
                "plant/lidar/objects",
                br#"{"value": {"minx": 0.5, "class": "Object"}, "ts": 1690000000001}"#,
            ))
            .unwrap();
        let SampleValue::Structured(map) = sample.value else {
            panic!("expected structured value");
        };
        assert_eq!(map["class"], "Object");
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = decoder()
            .decode(&message("plant/pump-1/speed", br#"{"bogus": true}"#))
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload { .. }));
        assert_eq!(err.topic(), "plant/pump-1/speed");
    }

    #[test]
    fn non_utf8_is_malformed() {
        let err = decoder()
            .decode(&message("plant/pump-1/speed", b"\xff\xfe\x00"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload { ref reason, .. } if reason.contains("UTF-8")));
    }

    #[test]
    fn kind_mismatch_is_malformed() {
        let err = decoder()
            .decode(&message(
                "plant/pump-1/running",
                br#"{"value": "yes", "ts": 1690000000000}"#,
            ))
            .unwrap_err();
        let DecodeError::MalformedPayload { reason, .. } = err else {
            panic!("expected malformed payload");
        };
        assert_eq!(reason, "expected a bool value, got string");
    }

    #[test]
    fn negative_timestamp_is_malformed() {
        let err = decoder()
            .decode(&message("plant/pump-1/mode", br#"{"value": "auto", "ts": -5}"#))
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload { .. }));
    }

    #[test]
    fn unknown_topics_are_rejected() {
        let d = decoder();
        for topic in ["plant/pump-2/speed", "other/pump-1/speed", "plant/pump-1/cmd/speed"] {
            let err = d
                .decode(&message(topic, br#"{"value": 1, "ts": 1}"#))
                .unwrap_err();
            assert_eq!(
                err,
                DecodeError::UnknownChannel {
                    topic: topic.into()
                }
            );
        }
    }
}
