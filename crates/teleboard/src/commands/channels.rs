//! `teleboard channels` -- list the active profile's catalog.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;

use teleboard_core::{ChannelCatalog, ChannelKind, ChannelSpec};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChannelInfo {
    id: String,
    kind: ChannelKind,
    topic: String,
    command_topic: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    stale_after_ms: Option<u64>,
}

impl ChannelInfo {
    fn new(catalog: &ChannelCatalog, spec: &ChannelSpec) -> Self {
        Self {
            id: spec.id().to_string(),
            kind: spec.kind,
            topic: catalog.topic_for(spec),
            command_topic: spec
                .is_writable()
                .then(|| catalog.command_topic_for(spec)),
            min: spec.control.and_then(|c| c.min),
            max: spec.control.and_then(|c| c.max),
            stale_after_ms: spec
                .stale_after
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

#[derive(Tabled)]
struct ChannelRow {
    #[tabled(rename = "Channel")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Topic")]
    topic: String,
    #[tabled(rename = "Control")]
    control: String,
    #[tabled(rename = "Stale After")]
    stale_after: String,
}

impl From<&ChannelInfo> for ChannelRow {
    fn from(c: &ChannelInfo) -> Self {
        let control = match (&c.command_topic, c.min, c.max) {
            (None, _, _) => "-".into(),
            (Some(_), None, None) => "writable".into(),
            (Some(_), min, max) => format!(
                "{}..{}",
                min.map(|v| v.to_string()).unwrap_or_default(),
                max.map(|v| v.to_string()).unwrap_or_default()
            ),
        };
        Self {
            id: c.id.clone(),
            kind: c.kind.to_string(),
            topic: c.topic.clone(),
            control,
            stale_after: c.stale_after_ms.map_or_else(
                || "default".into(),
                |ms| humantime::format_duration(Duration::from_millis(ms)).to_string(),
            ),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let catalog = config::resolve_catalog(global)?;
    let channels: Vec<ChannelInfo> = catalog
        .channels()
        .iter()
        .map(|spec| ChannelInfo::new(&catalog, spec))
        .collect();

    let out = output::render_list(
        global.output,
        &channels,
        |c| ChannelRow::from(c),
        |c| c.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
