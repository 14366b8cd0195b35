use thiserror::Error;

/// Top-level error type for the `teleboard-api` crate.
///
/// Covers every failure mode of the broker link: URL and topic validation,
/// connection setup, the client request queue, liveness, and payload
/// encoding. `teleboard-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Addressing ──────────────────────────────────────────────────
    /// Broker URL could not be used (bad scheme, missing host, ...).
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    /// Subscription filter violates MQTT wildcard rules.
    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter {
        filter: String,
        reason: &'static str,
    },

    /// Publish topic is empty or contains wildcard characters.
    #[error("Invalid topic name '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    // ── Connection ──────────────────────────────────────────────────
    /// Network-level failure (DNS, refused socket, reset, ...).
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// The broker answered the handshake with a non-success return code.
    #[error("Broker refused the connection: {0}")]
    Refused(String),

    /// TLS setup or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// No traffic from the broker within the liveness window.
    #[error("No traffic from broker within {timeout_ms}ms")]
    KeepAliveTimeout { timeout_ms: u64 },

    /// The broker (or the local side) closed the session.
    #[error("Broker connection closed")]
    Closed,

    // ── Client queue ────────────────────────────────────────────────
    /// The client request queue rejected an operation.
    #[error("Could not queue {operation}: {reason}")]
    Request {
        operation: &'static str,
        reason: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON encoding or decoding of a wire envelope failed.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the failure ends the current session, meaning the
    /// caller should tear the link down and reconnect.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Refused(_)
                | Self::Tls(_)
                | Self::KeepAliveTimeout { .. }
                | Self::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_fatal_classification() {
        assert!(Error::Closed.is_session_fatal());
        assert!(Error::KeepAliveTimeout { timeout_ms: 10 }.is_session_fatal());
        assert!(
            !Error::Request {
                operation: "publish",
                reason: "full".into()
            }
            .is_session_fatal()
        );
    }

    #[test]
    fn topic_filter_error_message() {
        let err = Error::InvalidTopicFilter {
            filter: "a/#/b".into(),
            reason: "multi-level wildcard must be last",
        };
        assert!(!err.is_session_fatal());
        assert_eq!(
            err.to_string(),
            "Invalid topic filter 'a/#/b': multi-level wildcard must be last"
        );
    }
}
