//! Clap derive structures for the `teleboard` CLI.
//!
//! Defines the command tree, global flags, and shared types. Compiled
//! into the build script as well, so it may only depend on clap,
//! clap_complete and humantime.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// teleboard -- live MQTT telemetry in the terminal
#[derive(Debug, Parser)]
#[command(
    name = "teleboard",
    version,
    about = "Watch and control MQTT telemetry channels from the command line",
    long_about = "Subscribes to a catalog of telemetry channels on an MQTT broker,\n\
        renders their latest values at a fixed rate, and publishes control\n\
        commands back to writable channels.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Broker profile to use
    #[arg(long, short = 'p', env = "TELEBOARD_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (overrides the platform default)
    #[arg(long, env = "TELEBOARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Broker URL (overrides profile)
    #[arg(long, short = 'b', global = true)]
    pub broker: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TELEBOARD_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live channel values to the terminal
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Publish one control command to a writable channel
    Set(SetArgs),

    /// List the channels in the active profile's catalog
    #[command(alias = "ch")]
    Channels,

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show these channels (`device/channel`, repeatable)
    #[arg(long = "channel", short = 'c')]
    pub channels: Vec<String>,

    /// Exit after rendering this many frames
    #[arg(long, short = 'n')]
    pub frames: Option<u64>,

    /// Exit after this long (e.g. "30s", "5m")
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Target channel as `device/channel`
    pub channel: String,

    /// Value to send; parsed according to the channel's kind
    pub value: String,

    /// How long to wait for the broker connection
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the loaded configuration (secrets redacted)
    Show,

    /// Write a starter profile
    Init {
        /// Broker URL for the new profile
        #[arg(long, default_value = "mqtt://localhost:1883")]
        broker: String,

        /// Topic namespace for the new profile
        #[arg(long, default_value = "telemetry")]
        namespace: String,

        /// Overwrite an existing profile of the same name
        #[arg(long)]
        force: bool,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store the broker password in the system keyring (read from stdin)
    SetPassword,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}

fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}
