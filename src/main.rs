//! API Health Monitor Binary

use api_health_monitor::{Config, HealthMonitor, MonitorEvent, MonitorState, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "api_health_monitor", version, about = "Periodic health checks for OpenAI-compatible APIs")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "API_HEALTH_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Seconds between check cycles, overriding settings.check_interval_seconds
    #[arg(long, env = "CHECK_INTERVAL_SECONDS")]
    interval: Option<u64>,

    /// Run a single check cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing();

    info!("Starting API health monitor v{}", env!("CARGO_PKG_VERSION"));

    let state = MonitorState::Idle;

    let config = match Config::from_file(&cli.config) {
        Ok(config) => match cli.interval {
            Some(seconds) => config.with_check_interval(seconds),
            None => config,
        },
        Err(e) => {
            let state = state.next(MonitorEvent::ConfigRejected);
            error!(?state, "Failed to load configuration: {}", e);
            eprintln!("Error: could not load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Monitor configuration - Services: {}, Probes: {}, Interval: {}s, Notification: {}",
        config.services.len(),
        config.task_count(),
        config.settings.check_interval_seconds,
        config.notification.is_some()
    );

    let mut monitor = match HealthMonitor::new(config) {
        Ok(monitor) => monitor,
        Err(e) => {
            let state = state.next(MonitorEvent::ConfigRejected);
            error!(?state, "Failed to start monitor: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.once {
        monitor.run_once().await?;
        return Ok(());
    }

    monitor.start().await
}

/// JSON log lines on stdout next to the printed reports; `RUST_LOG` overrides
/// the default of info for this crate and warn for everything else
fn initialize_tracing() {
    let default_directives = "warn,api_health_monitor=info";

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
