//! Subscriber setup for the relay binary.
//!
//! The CLI level applies to the relay's own crates. Everything else is held
//! at `info`, and the websocket stack stays at `info` even when the relay is
//! tracing unless `AURA_TRACE_DEPS` asks for it. `AURA_LOG_FILTER` replaces
//! the whole computation with a raw `EnvFilter` string.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::debug;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::env_truthy;

pub const LOG_FILTER_ENV: &str = "AURA_LOG_FILTER";
pub const TRACE_DEPS_ENV: &str = "AURA_TRACE_DEPS";

const RELAY_CRATES: &[&str] = &["aura_relay", "aura_surface"];
const SOCKET_CRATES: &[&str] = &["tokio_tungstenite", "tungstenite", "mio"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn is_verbose(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append here instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

// Holding the guard keeps the writer thread flushing until exit.
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Calls after the first success are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var(LOG_FILTER_ENV) {
        Ok(raw) => raw,
        Err(_) => {
            let trace_sockets = env_truthy(TRACE_DEPS_ENV).unwrap_or(false);
            directives(config.level, trace_sockets).join(",")
        }
    };
    let (writer, guard) = open_writer(config.file.as_deref())?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(&filter))
        .with(
            fmt::layer()
                .with_target(config.level.is_verbose())
                .with_ansi(config.file.is_none())
                .with_writer(writer),
        )
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    debug!(target = "aura_relay::telemetry", filter = %filter, "logging ready");
    Ok(())
}

fn open_writer(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let Some(path) = file else {
        return Ok(tracing_appender::non_blocking(std::io::stderr()));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| InitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(tracing_appender::non_blocking(file))
}

/// `EnvFilter` directives for a CLI level.
fn directives(level: LogLevel, trace_sockets: bool) -> Vec<String> {
    let own = match level {
        LogLevel::Error => return vec!["error".into()],
        LogLevel::Warn => return vec!["warn".into()],
        LogLevel::Info => return vec!["info".into()],
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };
    let mut out = vec!["info".to_string()];
    out.extend(RELAY_CRATES.iter().map(|krate| format!("{krate}={own}")));
    if !trace_sockets {
        out.extend(SOCKET_CRATES.iter().map(|krate| format!("{krate}=info")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_levels_are_a_single_directive() {
        assert_eq!(directives(LogLevel::Warn, false), vec!["warn"]);
        assert_eq!(directives(LogLevel::Info, true), vec!["info"]);
    }

    #[test]
    fn verbose_levels_hold_the_socket_stack_at_info() {
        assert_eq!(
            directives(LogLevel::Trace, false).join(","),
            "info,aura_relay=trace,aura_surface=trace,\
             tokio_tungstenite=info,tungstenite=info,mio=info"
        );
        assert_eq!(
            directives(LogLevel::Debug, true).join(","),
            "info,aura_relay=debug,aura_surface=debug"
        );
    }

    #[test]
    fn missing_log_directory_is_reported() {
        let path = std::env::temp_dir().join("aura-no-such-dir").join("relay.log");
        match open_writer(Some(&path)) {
            Err(InitError::Io { path: reported, .. }) => assert_eq!(reported, path),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("opened a file in a missing directory"),
        }
    }
}
