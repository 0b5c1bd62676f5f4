use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-tide",
    about = "🌊 Follow the gallery-dl server log from a terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "BEACH_TIDE_SERVER",
        value_name = "URL",
        help = "Base URL of the gallery-dl server (default http://127.0.0.1:9080)"
    )]
    pub server: Option<String>,

    #[arg(
        long,
        global = true,
        env = "BEACH_TIDE_SESSION",
        value_name = "KEY",
        help = "Key for resume state; defaults to the launching shell's pid"
    )]
    pub session: Option<String>,

    #[arg(
        long = "state-dir",
        global = true,
        env = "BEACH_TIDE_STATE_DIR",
        value_name = "PATH",
        help = "Directory holding per-session resume state"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Discard saved resume state before starting"
    )]
    pub fresh: bool,

    #[arg(
        long = "reconnect-ms",
        global = true,
        env = "BEACH_TIDE_RECONNECT_MS",
        value_name = "MILLIS",
        help = "Delay before reconnecting a dropped stream"
    )]
    pub reconnect_ms: Option<u64>,

    #[arg(
        long = "progress-marker",
        global = true,
        env = "BEACH_TIDE_PROGRESS_MARKER",
        value_name = "TEXT",
        help = "Substring that marks a line as a transient progress update"
    )]
    pub progress_marker: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "BEACH_TIDE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "BEACH_TIDE_LOG_FILE",
        help = "Write diagnostics to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Tail the log live (default when no subcommand given)
    Follow,
    /// Print the current server log once and exit
    Snapshot,
    /// Truncate the server log and print the server's reply
    Clear,
}

impl Cli {
    /// Command-line values layered over the environment defaults.
    pub fn to_config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(session) = &self.session {
            config.session = Some(session.clone());
        }
        if let Some(state_dir) = &self.state_dir {
            config.state_dir = Some(state_dir.clone());
        }
        if let Some(millis) = self.reconnect_ms {
            config.reconnect_delay = Duration::from_millis(millis);
        }
        if let Some(marker) = &self.progress_marker {
            config.progress_marker = marker.clone();
        }
        config
    }

    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Follow)
    }
}
