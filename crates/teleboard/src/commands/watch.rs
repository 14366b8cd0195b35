//! `teleboard watch` -- stream render frames to the terminal.

use std::io::{self, IsTerminal};

use tokio::time::Instant;
use tracing::{info, warn};

use teleboard_core::{ChannelId, ConnectionState, Dashboard, MqttTransport};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;
use crate::render::TerminalRenderer;

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let filter = args
        .channels
        .iter()
        .map(|raw| ChannelId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let (profile, dashboard_config) = config::resolve_dashboard(global)?;
    if let Some(unknown) = filter
        .iter()
        .find(|id| dashboard_config.catalog.get(id).is_none())
    {
        return Err(CliError::UnknownChannel {
            identifier: unknown.to_string(),
        });
    }
    let url = dashboard_config.broker.url.to_string();

    let dashboard = Dashboard::build(dashboard_config, MqttTransport)?;
    dashboard.start().await?;
    info!(profile = %profile, broker = %url, "watching");

    let stdout = io::stdout();
    let redraw = stdout.is_terminal();
    let (renderer, mut done) = TerminalRenderer::new(
        stdout,
        global.output,
        output::should_color(global.color),
        redraw,
    )
    .with_filter(filter)
    .until_done(args.frames);
    dashboard.drive(renderer).await;

    let mut state = dashboard.connection_state();
    let ctrl_c = tokio::signal::ctrl_c();
    let deadline = until(args.duration.map(|d| Instant::now() + d));
    tokio::pin!(ctrl_c, deadline);

    let result = loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => break Ok(()),
            () = &mut deadline => break Ok(()),
            finished = &mut done => break finished.unwrap_or(Ok(())),
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Failed => {
                        break Err(CliError::ConnectionFailed {
                            url: url.clone(),
                            reason: "reconnect budget exhausted".into(),
                        });
                    }
                    ConnectionState::Reconnecting { .. } => warn!(state = %current, "broker connection lost"),
                    _ => info!(state = %current, "connection state changed"),
                }
            }
        }
    };

    dashboard.stop().await;
    let stats = dashboard.stats();
    info!(
        received = stats.messages_received,
        dispatched = stats.messages_dispatched,
        failures = stats.handler_failures,
        reconnects = stats.reconnects,
        "watch finished"
    );
    result
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
