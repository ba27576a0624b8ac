//! CLI module for vncrelay-server.
//!
//! Used by the standalone binary and by the `serve` subcommand of the
//! unified `vncrelay` CLI.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vncrelay_config::{
    CliOverrides, LoggingConfig, apply_overrides, load_or_default, validate_config,
};
use vncrelay_core::{PROJECT_NAME, VERSION};

use crate::server::{ShutdownTrigger, run_with_shutdown};

/// vncrelay server CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vncrelay-server",
    version,
    about = "WebSocket/TCP relay for browser VNC viewers"
)]
pub struct ServerArgs {
    /// Config file path (json/jsonc/yaml/toml). Optional when --listen and --target are given.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run the relay with the given arguments until SIGINT/SIGTERM.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_or_default(args.config.as_deref())?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);
    info!(
        version = VERSION,
        listeners = config.listeners.len(),
        "{} starting",
        PROJECT_NAME
    );

    if let Some(listen) = &config.metrics.listen {
        match vncrelay_metrics::init_prometheus(listen) {
            Ok(()) => info!("metrics exporter listening on {} (/metrics)", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let trigger = ShutdownTrigger::new();
    let signals = trigger.clone();
    tokio::spawn(async move {
        loop {
            shutdown_signal_handler().await;
            if signals.trigger() {
                info!("shutdown signal received");
            } else {
                info!("shutdown already in progress, ignoring signal");
            }
        }
    });

    let report = run_with_shutdown(config, trigger.token()).await?;
    if report.forced > 0 {
        warn!(
            forced = report.forced,
            "some sessions did not drain within the grace period"
        );
    }
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize the tracing subscriber from the logging configuration.
///
/// - `level`: base level (trace, debug, info, warn, error), default info
/// - `format`: json, pretty or compact, default pretty
/// - `output`: stdout or stderr, default stderr
/// - `filters`: per-module level overrides
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(filter_directives(config))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match (format, output) {
        ("json", "stdout") => registry
            .with(fmt::layer().json().with_writer(io::stdout))
            .try_init(),
        ("json", _) => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
        ("compact", "stdout") => registry
            .with(fmt::layer().compact().with_writer(io::stdout))
            .try_init(),
        ("compact", _) => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .try_init(),
        (_, "stdout") => registry
            .with(fmt::layer().with_writer(io::stdout))
            .try_init(),
        _ => registry
            .with(fmt::layer().with_writer(io::stderr))
            .try_init(),
    };
}

fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter = config.level.as_deref().unwrap_or("info").to_string();
    let mut modules: Vec<_> = config.filters.iter().collect();
    modules.sort();
    for (module, level) in modules {
        filter.push(',');
        filter.push_str(module);
        filter.push('=');
        filter.push_str(level);
    }
    filter
}
