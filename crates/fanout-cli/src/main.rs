//! Fan-out broadcaster CLI: parses flags, layers them over an optional YAML
//! config file, wires up logging, and runs the engine against a real
//! WebSocket listener until an interrupt or terminate signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use fanout_core::{DispatchMode, FanoutConfig, Supervisor};
use fanout_transport::WebSocketServer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Fan-out strategy, mirroring [`fanout_core::DispatchMode`] with the
/// `clap::ValueEnum` impl the core crate has no reason to depend on.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Naive,
    Queue,
}

impl From<CliMode> for DispatchMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Naive => DispatchMode::Naive,
            CliMode::Queue => DispatchMode::Queue,
        }
    }
}

/// Fan-out broadcaster: publishes a steady stream of messages and fans each
/// one out to every connected WebSocket client.
#[derive(Parser)]
#[command(name = "fanout", author, version, about, long_about = None)]
struct Cli {
    /// Fan-out strategy
    #[arg(long, value_enum)]
    mode: Option<CliMode>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(long)]
    port: Option<u16>,

    /// Messages produced per second
    #[arg(long)]
    rate: Option<f64>,

    /// Payload size in bytes
    #[arg(long = "payload-bytes")]
    payload_bytes: Option<u32>,

    /// Per-session queue capacity (queue mode only)
    #[arg(long)]
    maxsize: Option<u32>,

    /// Max drops within drop-window-secs before disconnect
    #[arg(long = "drop-limit")]
    drop_limit: Option<u32>,

    /// Window, in seconds, over which drop-limit is counted
    #[arg(long = "drop-window-secs")]
    drop_window_secs: Option<f64>,

    /// Max continuous queue-full duration, in seconds, before disconnect
    #[arg(long = "full-timeout")]
    full_timeout: Option<f64>,

    /// WebSocket ping period, in seconds
    #[arg(long = "ping-interval")]
    ping_interval: Option<f64>,

    /// WebSocket ping timeout, in seconds
    #[arg(long = "ping-timeout")]
    ping_timeout: Option<f64>,

    /// Emit structured JSON logs instead of compact text
    #[arg(long = "log-json")]
    log_json: bool,

    /// Optional YAML config file; flags above override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Layer parsed flags over the config-file (or default) baseline. A
    /// flag left unset on the command line never overwrites a value the
    /// config file did set.
    fn apply(self, mut config: FanoutConfig) -> FanoutConfig {
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(payload_bytes) = self.payload_bytes {
            config.payload_bytes = payload_bytes;
        }
        if let Some(maxsize) = self.maxsize {
            config.maxsize = maxsize;
        }
        if let Some(drop_limit) = self.drop_limit {
            config.drop_limit = drop_limit;
        }
        if let Some(drop_window_secs) = self.drop_window_secs {
            config.drop_window_secs = drop_window_secs;
        }
        if let Some(full_timeout) = self.full_timeout {
            config.full_timeout = full_timeout;
        }
        if let Some(ping_interval) = self.ping_interval {
            config.ping_interval = ping_interval;
        }
        if let Some(ping_timeout) = self.ping_timeout {
            config.ping_timeout = ping_timeout;
        }
        if self.log_json {
            config.log_json = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(base) => cli.apply(base),
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = setup_logging(config.log_json) {
        eprintln!("error: {e:#}");
        return ExitCode::from(2);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::from(1)
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<FanoutConfig> {
    match path {
        None => Ok(FanoutConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))
        }
    }
}

fn setup_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }
    Ok(())
}

async fn run(config: FanoutConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!(%addr, mode = ?config.mode, rate = config.rate, "starting fan-out broadcaster");

    let server = WebSocketServer::bind(&addr, config.ping_interval(), config.ping_timeout())
        .await
        .with_context(|| format!("binding {addr}"))?;

    let supervisor = Supervisor::new(config);

    supervisor.run(server, shutdown_signal()).await;
    info!("shutdown complete");
    Ok(())
}

/// Resolves once SIGINT (Ctrl-C) or, on Unix, SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
