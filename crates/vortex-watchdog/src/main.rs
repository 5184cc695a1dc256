//! VortexL2 Tunnel Watchdog Daemon
//!
//! Monitors tunnel and port-forward health and recovers failed components.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vortex_core::config::{self, WatchdogConfig};
use vortex_watchdog::{shell, ConnectionPoolManager, TunnelWatchdog};

#[derive(Parser)]
#[command(name = "vortex-watchdog")]
#[command(about = "VortexL2 tunnel watchdog daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "VORTEXL2_CONFIG")]
    config: Option<PathBuf>,

    /// Tunnel inventory file (overrides config)
    #[arg(short, long)]
    tunnels: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this file (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Run one health check, print the report and exit
    #[arg(long)]
    once: bool,

    /// With --once, print the report as JSON
    #[arg(long, requires = "once")]
    json: bool,

    /// Write a default configuration file to this path and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        config::save_config(path, &WatchdogConfig::default())
            .with_context(|| format!("Failed to write default config to {:?}", path))?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    // Config comes first: it may name the log file
    let mut config = load_config(args.config.as_deref())?;
    if let Some(tunnels) = args.tunnels.clone() {
        config.tunnels_path = tunnels;
    }
    if let Some(log_file) = args.log_file.clone() {
        config.log_file = Some(log_file);
    }

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    let _log_guard = init_logging(log_level, config.log_file.as_deref())?;

    tracing::info!("VortexL2 watchdog starting...");
    tracing::info!("Tunnel inventory: {:?}", config.tunnels_path);
    if config.commands.tunnel_create.is_none() || config.commands.forward_create.is_none() {
        tracing::warn!("Recovery commands are not fully configured - recovery actions will fail");
    }

    let collaborators = shell::collaborators(&config);
    let pools = Arc::new(ConnectionPoolManager::new(config.pool.reuse_probability));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    let mut watchdog = TunnelWatchdog::new(config, collaborators, Arc::clone(&pools))
        .with_cancel_token(cancel.clone());

    if args.once {
        watchdog
            .check_health()
            .await
            .context("Health check failed")?;
        print_report(&watchdog, &pools, args.json)?;
        return Ok(());
    }

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    watchdog.run().await;

    tracing::info!("Watchdog shutdown complete");
    Ok(())
}

/// Explicit path must load; the default path is optional
fn load_config(path: Option<&Path>) -> Result<WatchdogConfig> {
    if let Some(path) = path {
        return config::load_watchdog_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        config::load_watchdog_config(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path))
    } else {
        Ok(WatchdogConfig::default())
    }
}

/// Stderr logging plus an optional non-blocking file layer.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {:?}", path))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn print_report(watchdog: &TunnelWatchdog, pools: &ConnectionPoolManager, json: bool) -> Result<()> {
    if json {
        let status = serde_json::to_string_pretty(&watchdog.status())
            .context("Failed to serialize status")?;
        println!("{}", status);
        return Ok(());
    }

    println!("{}", watchdog.monitor().health_report());

    let (tunnels, ports) = watchdog.monitor().get_recovery_needed();
    if !tunnels.is_empty() || !ports.is_empty() {
        println!();
        println!("Recovery needed - Tunnels: {:?}, Ports: {:?}", tunnels, ports);
    }

    for (name, status) in pools.get_all_status() {
        println!();
        println!("[{}]", name);
        println!("{}", status);
    }
    Ok(())
}
