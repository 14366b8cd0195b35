//! Shared configuration for the teleboard binaries.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `teleboard_core::DashboardConfig`. The core never
//! reads files; everything it needs is assembled here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use teleboard_core::{
    BrokerConfig, ChannelCatalog, ChannelKind, ChannelSpec, ControlSpec, CoreError, Credentials,
    DashboardConfig, QoS, ReconnectPolicy, RenderConfig,
};

/// Service name under which secrets are stored in the system keyring.
pub const KEYRING_SERVICE: &str = "teleboard";

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "TELEBOARD_CONFIG";

const ENV_PREFIX: &str = "TELEBOARD_";
const USERNAME_ENV: &str = "TELEBOARD_USERNAME";
const PASSWORD_ENV: &str = "TELEBOARD_PASSWORD";
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("no password configured for user '{username}' in profile '{profile}'")]
    NoCredentials { profile: String, username: String },

    #[error("invalid dashboard configuration: {0}")]
    Dashboard(#[from] CoreError),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Global defaults, overridden per profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named broker profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Resolve the active profile name: explicit choice, then the file's
    /// `default_profile`, then `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.available_profiles(),
            })
    }

    /// Comma-separated profile names, or `(none)`.
    pub fn available_profiles(&self) -> String {
        if self.profiles.is_empty() {
            "(none)".into()
        } else {
            self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    }

    /// Copy with plaintext secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for profile in copy.profiles.values_mut() {
            if profile.password.is_some() {
                profile.password = Some(REDACTED.into());
            }
        }
        copy
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Render tick period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Staleness threshold in milliseconds.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    /// MQTT keep-alive in milliseconds.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            tick_ms: default_tick_ms(),
            stale_after_ms: default_stale_after_ms(),
            keep_alive_ms: default_keep_alive_ms(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_tick_ms() -> u64 {
    millis(RenderConfig::default().tick_period)
}
fn default_stale_after_ms() -> u64 {
    millis(RenderConfig::default().default_stale_after)
}
fn default_keep_alive_ms() -> u64 {
    30_000
}

/// A named broker profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Broker URL (e.g., "mqtt://broker.local:1883", "mqtts://host").
    pub broker: String,

    /// MQTT client id. Defaults to `teleboard-<pid>`.
    pub client_id: Option<String>,

    /// First topic level shared by every channel.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Broker username; `TELEBOARD_USERNAME` is used when absent.
    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// PEM bundle trusted for `mqtts://` brokers.
    pub ca_cert: Option<PathBuf>,

    /// Override the default keep-alive.
    pub keep_alive_ms: Option<u64>,

    pub clean_session: Option<bool>,

    pub subscribe_qos: Option<QoS>,

    pub command_qos: Option<QoS>,

    /// Override the default render tick period.
    pub tick_ms: Option<u64>,

    /// Override the default staleness threshold.
    pub stale_after_ms: Option<u64>,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// The channel catalog.
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

fn default_namespace() -> String {
    "telemetry".into()
}

impl Profile {
    /// A profile with only the broker URL set.
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            client_id: None,
            namespace: default_namespace(),
            username: None,
            password: None,
            password_env: None,
            ca_cert: None,
            keep_alive_ms: None,
            clean_session: None,
            subscribe_qos: None,
            command_qos: None,
            tick_ms: None,
            stale_after_ms: None,
            reconnect: ReconnectSettings::default(),
            channels: Vec::new(),
        }
    }
}

/// Backoff settings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    /// Absent means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_delay_ms: millis(policy.base_delay),
            max_delay_ms: millis(policy.max_delay),
            jitter: policy.jitter,
            max_retries: policy.max_retries,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
            max_retries: settings.max_retries,
        }
    }
}

/// One `[[profiles.<name>.channels]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelEntry {
    pub device: String,
    pub channel: String,

    #[serde(default = "default_kind")]
    pub kind: ChannelKind,

    pub stale_after_ms: Option<u64>,

    /// Present (possibly empty) when the channel accepts commands.
    pub control: Option<ControlSpec>,
}

fn default_kind() -> ChannelKind {
    ChannelKind::Number
}

impl From<&ChannelEntry> for ChannelSpec {
    fn from(entry: &ChannelEntry) -> Self {
        let mut spec = ChannelSpec::new(entry.device.clone(), entry.channel.clone(), entry.kind);
        if let Some(ms) = entry.stale_after_ms {
            spec = spec.with_stale_after(Duration::from_millis(ms));
        }
        if let Some(control) = entry.control {
            spec = spec.with_control(control);
        }
        spec
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `TELEBOARD_CONFIG`, then the platform
/// config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("dev", "teleboard", "teleboard").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("teleboard");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Layer defaults, the TOML file at `path` (if present) and `TELEBOARD_*`
/// variables. Nested keys use `__`, e.g. `TELEBOARD_PROFILES__LAB__BROKER`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["CONFIG", "PROFILE", "OUTPUT", "USERNAME", "PASSWORD"])
                .split("__"),
        );

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize `cfg` as TOML to `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_key(profile_name: &str) -> String {
    format!("{profile_name}/password")
}

fn keyring_password(profile_name: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_key(profile_name))
        .and_then(|entry| entry.get_password())
        .ok()
}

/// Store a broker password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_key(profile_name))?;
    entry.set_password(password)?;
    Ok(())
}

/// Resolve broker credentials. No username means an anonymous session.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<Credentials>, ConfigError> {
    resolve_credentials_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        keyring_password,
    )
}

fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<Option<Credentials>, ConfigError> {
    let Some(username) = profile.username.clone().or_else(|| env(USERNAME_ENV)) else {
        return Ok(None);
    };

    // 1. Profile's password_env, then TELEBOARD_PASSWORD
    let from_env = profile
        .password_env
        .as_deref()
        .and_then(&env)
        .or_else(|| env(PASSWORD_ENV));

    let password = from_env
        // 2. System keyring
        .or_else(|| keyring(profile_name))
        // 3. Plaintext in config
        .or_else(|| profile.password.clone())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
            username: username.clone(),
        })?;

    Ok(Some(Credentials {
        username,
        password: SecretString::from(password),
    }))
}

// ── Translation ─────────────────────────────────────────────────────

/// Build the core `DashboardConfig` for a profile.
pub fn profile_to_dashboard_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<DashboardConfig, ConfigError> {
    let credentials = resolve_credentials(profile, profile_name)?;
    build_dashboard_config(profile, defaults, credentials)
}

fn build_dashboard_config(
    profile: &Profile,
    defaults: &Defaults,
    credentials: Option<Credentials>,
) -> Result<DashboardConfig, ConfigError> {
    let url: url::Url = profile
        .broker
        .parse()
        .map_err(|e| ConfigError::Validation {
            field: "broker".into(),
            reason: format!("invalid URL '{}': {e}", profile.broker),
        })?;

    let client_id = profile
        .client_id
        .clone()
        .unwrap_or_else(|| format!("teleboard-{}", std::process::id()));

    let mut broker = BrokerConfig::new(url, client_id);
    broker.credentials = credentials;
    broker.keep_alive =
        Duration::from_millis(profile.keep_alive_ms.unwrap_or(defaults.keep_alive_ms));
    if let Some(clean) = profile.clean_session {
        broker.clean_session = clean;
    }
    broker.ca_file.clone_from(&profile.ca_cert);
    broker.reconnect = ReconnectPolicy::from(&profile.reconnect);
    if let Some(qos) = profile.subscribe_qos {
        broker.subscribe_qos = qos;
    }
    if let Some(qos) = profile.command_qos {
        broker.command_qos = qos;
    }

    let render = RenderConfig {
        tick_period: Duration::from_millis(profile.tick_ms.unwrap_or(defaults.tick_ms)),
        default_stale_after: Duration::from_millis(
            profile.stale_after_ms.unwrap_or(defaults.stale_after_ms),
        ),
    };

    let catalog = profile_catalog(profile)?;

    let config = DashboardConfig {
        broker,
        render,
        catalog,
    };
    config.validate()?;
    Ok(config)
}

/// Build and validate a profile's channel catalog. Needs no credentials.
pub fn profile_catalog(profile: &Profile) -> Result<ChannelCatalog, ConfigError> {
    let specs = profile.channels.iter().map(ChannelSpec::from).collect();
    Ok(ChannelCatalog::new(profile.namespace.clone(), specs)?)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
