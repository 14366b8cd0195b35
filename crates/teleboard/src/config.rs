//! CLI configuration: thin wrapper around `teleboard_config`.
//!
//! Adds `GlobalOpts`-aware resolution on top of the shared crate:
//! `--config` picks the file, `--profile` the profile, `--broker`
//! overrides the profile's URL.

use std::path::PathBuf;

use teleboard_core::{ChannelCatalog, DashboardConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use teleboard_config::{Config, Profile, save_config_to, store_password};

/// The config file in effect: `--config` / `TELEBOARD_CONFIG`, else the
/// platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(teleboard_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(teleboard_config::load_config_from(&config_file(global))?)
}

pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Look up the active profile, applying the `--broker` override.
pub fn active_profile(global: &GlobalOpts, config: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, config);
    if config.profiles.is_empty() {
        return Err(CliError::NoConfig {
            path: config_file(global).display().to_string(),
        });
    }
    let mut profile = config.profile(&name)?.clone();
    if let Some(ref broker) = global.broker {
        profile.broker.clone_from(broker);
    }
    Ok((name, profile))
}

/// Resolve the active profile into everything `Dashboard::build` needs.
pub fn resolve_dashboard(global: &GlobalOpts) -> Result<(String, DashboardConfig), CliError> {
    let cfg = load(global)?;
    let (name, profile) = active_profile(global, &cfg)?;
    let dashboard = teleboard_config::profile_to_dashboard_config(&profile, &name, &cfg.defaults)?;
    tracing::debug!(profile = %name, broker = %dashboard.broker.url, "resolved dashboard config");
    Ok((name, dashboard))
}

/// The active profile's channel catalog, without touching credentials.
pub fn resolve_catalog(global: &GlobalOpts) -> Result<ChannelCatalog, CliError> {
    let cfg = load(global)?;
    let (_, profile) = active_profile(global, &cfg)?;
    Ok(teleboard_config::profile_catalog(&profile)?)
}
