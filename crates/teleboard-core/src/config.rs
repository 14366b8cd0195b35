// ── Runtime dashboard configuration ──
//
// These types describe *how* to reach the broker and how fast to render.
// They carry credential data and tuning, but never touch disk. The CLI
// (via teleboard-config) builds a `DashboardConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use teleboard_api::{Credentials, MIN_KEEP_ALIVE, QoS, SessionOptions, TlsMode};
use url::Url;

use crate::catalog::ChannelCatalog;
use crate::error::CoreError;

// ── Reconnect policy ─────────────────────────────────────────────

/// Exponential backoff parameters for the connection task.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub base_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Uniform random spread applied to each delay, as a fraction of it
    /// (`0.0` disables jitter, `0.25` means ±25%). Default: 0.2.
    pub jitter: f64,

    /// Maximum consecutive reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.base_delay.is_zero() {
            return Err(config_error("reconnect base delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(config_error(
                "reconnect max delay must not be shorter than the base delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(config_error(format!(
                "reconnect jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

// ── Broker ───────────────────────────────────────────────────────

/// Connection settings for a single broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker URL (e.g., `mqtt://broker.local:1883`, `mqtts://host`).
    pub url: Url,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    /// MQTT keep-alive, at least [`MIN_KEEP_ALIVE`]. The liveness watchdog
    /// fires after twice this.
    pub keep_alive: Duration,
    pub clean_session: bool,
    /// PEM bundle to trust instead of the system roots (TLS schemes only).
    pub ca_file: Option<PathBuf>,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the client's outbound request queue.
    pub request_capacity: usize,
    /// QoS used for every subscription.
    pub subscribe_qos: QoS,
    /// QoS used for control commands.
    pub command_qos: QoS,
}

impl BrokerConfig {
    pub fn new(url: Url, client_id: impl Into<String>) -> Self {
        Self {
            url,
            client_id: client_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            ca_file: None,
            reconnect: ReconnectPolicy::default(),
            request_capacity: 128,
            subscribe_qos: QoS::AtLeastOnce,
            command_qos: QoS::AtLeastOnce,
        }
    }

    /// Check everything the connection task relies on before it is spawned.
    pub fn validate(&self) -> Result<(), CoreError> {
        // Scheme and host checks live with the transport options.
        self.session_options().host_port()?;

        if self.client_id.trim().is_empty() {
            return Err(config_error("client id must not be empty"));
        }
        if self.keep_alive < MIN_KEEP_ALIVE {
            return Err(config_error(format!(
                "keep-alive interval must be at least {}ms, got {}ms",
                MIN_KEEP_ALIVE.as_millis(),
                self.keep_alive.as_millis()
            )));
        }
        if self.request_capacity == 0 {
            return Err(config_error("request capacity must be greater than zero"));
        }
        self.reconnect.validate()
    }

    /// Translate into the options a transport needs to open a session.
    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::new(self.url.clone(), self.client_id.clone());
        options.credentials.clone_from(&self.credentials);
        options.keep_alive = self.keep_alive;
        options.clean_session = self.clean_session;
        options.request_capacity = self.request_capacity;
        if let Some(ref ca) = self.ca_file {
            if options.uses_tls() {
                options.tls = TlsMode::CustomCa(ca.clone());
            }
        }
        options
    }

    /// Liveness window: no transport event for this long means the session
    /// is dead.
    pub fn watchdog_timeout(&self) -> Duration {
        self.keep_alive.saturating_mul(2)
    }
}

// ── Rendering ────────────────────────────────────────────────────

/// Render cadence and staleness defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Period between render ticks. Default: 100ms (10 Hz).
    pub tick_period: Duration,
    /// Staleness threshold for channels without their own override.
    pub default_stale_after: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100),
            default_stale_after: Duration::from_secs(10),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tick_period.is_zero() {
            return Err(config_error("render tick period must be greater than zero"));
        }
        if self.default_stale_after.is_zero() {
            return Err(config_error("staleness threshold must be greater than zero"));
        }
        Ok(())
    }
}

// ── Dashboard ────────────────────────────────────────────────────

/// Everything `Dashboard::build` needs.
///
/// Built by the CLI, passed to the core -- the core never reads config files.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub broker: BrokerConfig,
    pub render: RenderConfig,
    pub catalog: ChannelCatalog,
}

impl DashboardConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        self.broker.validate()?;
        self.render.validate()
    }
}

fn config_error(message: impl Into<String>) -> CoreError {
    CoreError::Config {
        message: message.into(),
    }
}
