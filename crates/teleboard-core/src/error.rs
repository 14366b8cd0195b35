// ── Core error types ──
//
// Consumers of the core never see raw transport errors for inbound
// traffic: those are recovered by the connection task and surface only as
// `ConnectionState` transitions. What does reach callers (publish,
// subscribe, control submission, configuration) is translated here.

use thiserror::Error;

/// Why an inbound message could not be turned into a sample.
///
/// Decode failures stop at the router: they are logged and counted, never
/// propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed payload on '{topic}': {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("Topic '{topic}' does not map to a known channel")]
    UnknownChannel { topic: String },
}

impl DecodeError {
    pub fn topic(&self) -> &str {
        match self {
            Self::MalformedPayload { topic, .. } | Self::UnknownChannel { topic } => topic,
        }
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Transport error: {message}")]
    Transport { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Unknown channel: {identifier}")]
    UnknownChannel { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter { filter: String, reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<teleboard_api::Error> for CoreError {
    fn from(err: teleboard_api::Error) -> Self {
        use teleboard_api::Error as Api;

        match err {
            Api::InvalidUrl(message) => CoreError::Config {
                message: format!("Invalid broker URL: {message}"),
            },
            Api::InvalidTopicFilter { filter, reason } => CoreError::InvalidTopicFilter {
                filter,
                reason: reason.to_owned(),
            },
            Api::InvalidTopic { topic, reason } => CoreError::Validation {
                message: format!("invalid topic '{topic}': {reason}"),
            },
            Api::Closed => CoreError::NotConnected,
            Api::Payload(e) => CoreError::Internal(format!("payload encoding failed: {e}")),
            other @ (Api::Connection(_)
            | Api::Refused(_)
            | Api::Tls(_)
            | Api::KeepAliveTimeout { .. }
            | Api::Request { .. }) => CoreError::Transport {
                message: other.to_string(),
            },
        }
    }
}
