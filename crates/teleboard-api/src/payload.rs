//! JSON wire envelopes.
//!
//! Inbound samples look like `{ "value": <scalar|object>, "ts": <epoch-millis> }`.
//! Outbound commands use the same shape with a scalar value. Unknown extra
//! fields on inbound samples are ignored; missing `value` or `ts` is an error.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A raw sample as published by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEnvelope {
    /// Scalar or object payload; interpretation belongs to the decoder.
    pub value: serde_json::Value,

    /// Source timestamp in milliseconds since the Unix epoch.
    pub ts: i64,
}

impl SampleEnvelope {
    /// Parse an envelope from raw payload bytes.
    pub fn from_slice(payload: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// A command published back to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub value: serde_json::Value,
    pub ts: i64,
}

impl CommandEnvelope {
    /// Serialize to compact JSON bytes ready for publishing.
    pub fn encode(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}
