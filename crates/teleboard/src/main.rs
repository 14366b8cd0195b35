mod cli;
mod commands;
mod config;
mod error;
mod output;
mod render;

use std::fs::OpenOptions;

use clap::{CommandFactory, Parser};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match init_tracing(&cli.global) {
        Ok(guard) => {
            let result = run(cli).await;
            // Flush buffered log lines before a possible process::exit.
            drop(guard);
            result
        }
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Install the global subscriber: human-readable on stderr, or JSON lines
/// to `--log-file` through a non-blocking writer.
fn init_tracing(global: &GlobalOpts) -> Result<Option<WorkerGuard>, CliError> {
    let level = match global.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(ref path) = global.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        return Ok(Some(guard));
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(None)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    tracing::debug!(command = ?cli.command, "dispatching command");
    match cli.command {
        Command::Watch(args) => commands::watch::handle(args, &cli.global).await,
        Command::Set(args) => commands::set::handle(args, &cli.global).await,
        Command::Channels => commands::channels::handle(&cli.global),
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "teleboard", &mut std::io::stdout());
            Ok(())
        }
    }
}
