use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

const FILTER_ENV: &str = "BEACH_TIDE_LOG_FILTER";
const TRACE_DEPS_ENV: &str = "BEACH_TIDE_TRACE_DEPS";

/// Crates whose trace output drowns the tailer's own at `--log-level trace`.
const NOISY_DEPS: &[&str] = &[
    "hyper",
    "hyper_util",
    "tokio_tungstenite",
    "tungstenite",
    "reqwest",
    "rustls",
    "mio",
    "h2",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Base `EnvFilter` directive. Debug and trace only raise this crate.
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "info,beach_tide=debug",
            LogLevel::Trace => "info,beach_tide=trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber once. Diagnostics go to stderr or the log
/// file so they never interleave with the tailed log on stdout.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let directives = match std::env::var(FILTER_ENV) {
        Ok(filter) => filter,
        Err(_) => filter_directives(config.level, flag_set(TRACE_DEPS_ENV)),
    };
    let (writer, guard) = writer_for(config)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(guard);
    tracing::trace!(%directives, "log filter installed");
    Ok(())
}

fn writer_for(config: &LogConfig) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let Some(path) = &config.file else {
        return Ok(tracing_appender::non_blocking(std::io::stderr()));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| InitError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(tracing_appender::non_blocking(file))
}

/// Filter for `level`. Dependency traces are held at info unless asked for.
pub(crate) fn filter_directives(level: LogLevel, trace_deps: bool) -> String {
    let mut directives = level.directive().to_owned();
    if level == LogLevel::Trace && !trace_deps {
        for dep in NOISY_DEPS {
            directives.push_str(&format!(",{dep}=info"));
        }
    }
    directives
}

fn flag_set(var: &str) -> bool {
    std::env::var(var).is_ok_and(|value| !value.is_empty() && value != "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_holds_dependencies_at_info() {
        let filter = filter_directives(LogLevel::Trace, false);
        assert!(filter.starts_with("info,beach_tide=trace,"));
        assert!(filter.contains(",tungstenite=info"));
        assert!(filter.ends_with(",h2=info"));
    }

    #[test]
    fn trace_deps_flag_keeps_dependency_traces() {
        assert_eq!(
            filter_directives(LogLevel::Trace, true),
            "info,beach_tide=trace"
        );
    }

    #[test]
    fn debug_raises_only_this_crate() {
        assert_eq!(
            filter_directives(LogLevel::Debug, false),
            "info,beach_tide=debug"
        );
        assert_eq!(filter_directives(LogLevel::default(), false), "warn");
    }

    #[test]
    fn directives_parse_as_env_filters() {
        for level in LogLevel::value_variants() {
            let directives = filter_directives(*level, false);
            assert!(
                EnvFilter::try_new(&directives).is_ok(),
                "rejected {directives}"
            );
        }
    }
}
