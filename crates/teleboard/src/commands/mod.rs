//! Subcommand handlers.

pub mod channels;
pub mod config_cmd;
pub mod set;
pub mod watch;
