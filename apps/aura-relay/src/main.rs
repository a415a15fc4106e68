use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use aura_relay::config::{ENDPOINT, RelayConfig};
use aura_relay::host::{ContextHost, LocalHost, spawn_writeback};
use aura_relay::supervisor::{Supervisor, SupervisorHandle};
use aura_relay::telemetry::logging::{self, LogConfig, LogLevel};
use aura_relay::transport::WebSocketConnector;
use aura_surface::{Document, TextControl};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "aura-relay",
    author,
    version,
    about = "Applies range replacements from a local editing client to open documents"
)]
struct Cli {
    /// File served as an editable text area. Repeat to open several contexts.
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Zero-based index of the file whose context starts focused.
    #[arg(long, default_value_t = 0)]
    focus: usize,

    /// Grow the reconnect delay by 1.5x per failure instead of 2x.
    #[arg(long, default_value_t = false)]
    relaxed_backoff: bool,

    #[arg(long, value_enum, env = "AURA_LOG_LEVEL", default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "AURA_LOG_FILE")]
    log_file: Option<PathBuf>,
}

struct ServeConfig {
    files: Vec<PathBuf>,
    focus: usize,
    relay: RelayConfig,
    log: LogConfig,
}

impl TryFrom<Cli> for ServeConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if !cli.files.is_empty() && cli.focus >= cli.files.len() {
            bail!(
                "--focus {} is out of range for {} file(s)",
                cli.focus,
                cli.files.len()
            );
        }
        let mut relay = RelayConfig::from_env();
        if cli.relaxed_backoff {
            relay = relay.relaxed();
        }
        Ok(ServeConfig {
            files: cli.files,
            focus: cli.focus,
            relay,
            log: LogConfig {
                level: cli.log_level,
                file: cli.log_file,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let serve = ServeConfig::try_from(Cli::parse())?;
    logging::init(&serve.log).context("failed to initialise logging")?;

    let (handle, control) = SupervisorHandle::channel();
    let host = Arc::new(LocalHost::new(handle.clone()));

    let mut writers = Vec::with_capacity(serve.files.len());
    for path in &serve.files {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut document = Document::new();
        let root = document.root();
        let field = document.append_control(root, TextControl::textarea(text));
        document.focus(field);

        let (target, shared) = host.open(document);
        writers.push(spawn_writeback(path.clone(), shared, field));
        info!(
            target = "aura_relay::main",
            context = %target,
            path = %path.display(),
            "serving file"
        );
    }
    if let Some(target) = host.targets().get(serve.focus).copied() {
        host.focus(target)?;
    }
    if serve.files.is_empty() {
        warn!(
            target = "aura_relay::main",
            "no --file given; every command will be answered with no-tab"
        );
    }

    let connector =
        WebSocketConnector::new(ENDPOINT).with_connect_timeout(serve.relay.connect_timeout);
    let supervisor = Supervisor::new(
        connector,
        host.clone(),
        serve.relay,
        control,
    );
    let running = tokio::spawn(supervisor.run());

    signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    handle.shutdown();
    let _ = running.await;
    for writer in writers {
        writer.abort();
    }
    Ok(())
}
