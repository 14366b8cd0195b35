//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use teleboard_config::ConfigError;
use teleboard_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach broker at {url}")]
    #[diagnostic(
        code(teleboard::connection_failed),
        help(
            "Check that the broker is running and reachable.\n\
             Broker: {url}\n\
             Run with -vv to see each reconnect attempt."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Not connected to the broker")]
    #[diagnostic(
        code(teleboard::not_connected),
        help("The broker connection dropped before the command could be sent. Try again.")
    )]
    NotConnected,

    #[error("Timed out after {waited} waiting for the broker")]
    #[diagnostic(
        code(teleboard::timeout),
        help("Increase the wait with --timeout or check broker reachability.")
    )]
    Timeout { waited: String },

    // ── Credentials ──────────────────────────────────────────────────
    #[error("No password available for user '{username}' in profile '{profile}'")]
    #[diagnostic(
        code(teleboard::no_credentials),
        help(
            "Store one with: teleboard config set-password --profile {profile}\n\
             Or set the TELEBOARD_PASSWORD environment variable."
        )
    )]
    NoCredentials { profile: String, username: String },

    // ── Channels ─────────────────────────────────────────────────────
    #[error("Channel '{identifier}' not found")]
    #[diagnostic(
        code(teleboard::unknown_channel),
        help("Run: teleboard channels to see the cataloged channels")
    )]
    UnknownChannel { identifier: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(teleboard::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(teleboard::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: teleboard config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No broker configured")]
    #[diagnostic(
        code(teleboard::no_config),
        help(
            "Create a profile with: teleboard config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(teleboard::config))]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(teleboard::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(teleboard::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::UnknownChannel { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotConnected => CliError::NotConnected,

            CoreError::Transport { message } => CliError::ConnectionFailed {
                url: "(broker)".into(),
                reason: message,
            },

            CoreError::UnknownChannel { identifier } => CliError::UnknownChannel { identifier },

            CoreError::Validation { message } => CliError::Validation {
                field: "value".into(),
                reason: message,
            },

            CoreError::InvalidTopicFilter { filter, reason } => CliError::Validation {
                field: "topic filter".into(),
                reason: format!("'{filter}': {reason}"),
            },

            CoreError::Config { message } => CliError::Config { message },

            CoreError::Decode(e) => CliError::Internal(e.to_string()),

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::NoCredentials { profile, username } => {
                CliError::NoCredentials { profile, username }
            }
            ConfigError::Dashboard(core) => core.into(),
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
