//! `teleboard set` -- publish one control command.

use std::time::Duration;

use serde::Serialize;

use teleboard_core::{
    ChannelId, ChannelKind, ConnectionState, Dashboard, MqttTransport, SampleValue, Transport,
};

use crate::cli::{GlobalOpts, SetArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct Published {
    channel: String,
    topic: String,
    value: SampleValue,
    ts: i64,
}

pub async fn handle(args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let id = ChannelId::parse(&args.channel)?;
    let (_, dashboard_config) = config::resolve_dashboard(global)?;
    let spec = dashboard_config
        .catalog
        .get(&id)
        .ok_or_else(|| CliError::UnknownChannel {
            identifier: id.to_string(),
        })?;
    let value = parse_value(spec.kind, &args.value)?;
    let url = dashboard_config.broker.url.to_string();

    let dashboard = Dashboard::build(dashboard_config, MqttTransport)?;
    // Rejects read-only channels before any connection is made.
    let command = dashboard.publisher().command_for(&id, value)?;
    let published = Published {
        channel: id.to_string(),
        topic: command.command_topic.clone(),
        value: command.payload.value.clone(),
        ts: command.payload.ts,
    };

    dashboard.start().await?;
    let result = match wait_connected(&dashboard, &url, args.timeout).await {
        Ok(()) => dashboard.control().send(command).await.map_err(CliError::from),
        Err(e) => Err(e),
    };
    dashboard.stop().await;
    result?;

    let out = output::render_single(
        global.output,
        &published,
        |p| format!("✓ {} ← {} ({})", p.channel, p.value, p.topic),
        |p| p.topic.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn wait_connected<T: Transport>(
    dashboard: &Dashboard<T>,
    url: &str,
    timeout: Duration,
) -> Result<(), CliError> {
    let mut state = dashboard.connection_state();
    let reached = tokio::time::timeout(
        timeout,
        state.wait_for(|s| s.is_connected() || *s == ConnectionState::Failed),
    )
    .await
    .map_err(|_| CliError::Timeout {
        waited: humantime::format_duration(timeout).to_string(),
    })?
    .map(|s| *s)
    .map_err(|_| CliError::NotConnected)?;

    if reached == ConnectionState::Failed {
        return Err(CliError::ConnectionFailed {
            url: url.into(),
            reason: "reconnect budget exhausted".into(),
        });
    }
    Ok(())
}

/// Parse a command-line value according to the channel's declared kind.
fn parse_value(kind: ChannelKind, raw: &str) -> Result<SampleValue, CliError> {
    let invalid = |reason: String| CliError::Validation {
        field: "value".into(),
        reason,
    };
    match kind {
        ChannelKind::Number => raw
            .parse::<f64>()
            .map(SampleValue::Number)
            .map_err(|e| invalid(format!("'{raw}' is not a number: {e}"))),
        ChannelKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(SampleValue::Bool(true)),
            "false" | "off" | "0" => Ok(SampleValue::Bool(false)),
            _ => Err(invalid(format!("'{raw}' is not a boolean (true/false, on/off)"))),
        },
        ChannelKind::Text => Ok(SampleValue::Text(raw.to_owned())),
        ChannelKind::Structured => Err(invalid(
            "structured channels cannot be set from the command line".into(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_by_kind() {
        assert_eq!(
            parse_value(ChannelKind::Number, "12.5").unwrap(),
            SampleValue::Number(12.5)
        );
        assert_eq!(
            parse_value(ChannelKind::Bool, "ON").unwrap(),
            SampleValue::Bool(true)
        );
        assert_eq!(
            parse_value(ChannelKind::Text, "auto").unwrap(),
            SampleValue::Text("auto".into())
        );
    }

    #[test]
    fn rejects_values_of_the_wrong_shape() {
        assert!(matches!(
            parse_value(ChannelKind::Number, "fast"),
            Err(CliError::Validation { .. })
        ));
        assert!(parse_value(ChannelKind::Bool, "maybe").is_err());
        assert!(parse_value(ChannelKind::Structured, "{}").is_err());
    }
}
