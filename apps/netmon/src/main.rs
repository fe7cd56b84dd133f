use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logger::LogOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use netmon::analysis::{build_export, load_data, write_export};
use netmon::config::Config;
use netmon::dashboard::{DashboardOptions, run_dashboard};
use netmon::database::Store;
use netmon::monitoring::{Monitor, ProcessRunner, SpeedTester};

/// How long the monitor gets to wind down after the dashboard closes
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "netmon", about = "Periodic network connectivity logger with live dashboard", version)]
struct Cli {
    /// Path to the TOML config file (default: $XDG_CONFIG_HOME/netmon/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop, with the live dashboard unless disabled.
    Run {
        /// Run one round of checks and exit.
        #[arg(long)]
        once: bool,

        /// Override interval between checks in seconds.
        #[arg(long)]
        interval: Option<f64>,

        /// Run without the live dashboard (implied by --once).
        #[arg(long)]
        no_dashboard: bool,

        /// Override dashboard refresh interval in seconds.
        #[arg(long)]
        gui_refresh: Option<f64>,

        /// Override dashboard rolling window in minutes.
        #[arg(long)]
        gui_window: Option<f64>,
    },

    /// Export every measurement database to JSON for the web front end.
    Export {
        /// Directory holding the *.db files.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output JSON file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a single speed test and print the outcome.
    Speedtest {
        /// Timeout in seconds.
        #[arg(long, default_value_t = 90.0)]
        timeout: f64,

        /// Server ID to force (see `speedtest --list`).
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { once, interval, no_dashboard, gui_refresh, gui_window } => {
            let mut config = Config::from_config(cli.config.as_deref())?;
            if let Some(interval) = interval {
                config.interval_seconds = interval;
            }
            if let Some(refresh) = gui_refresh {
                config.gui_refresh_seconds = refresh;
            }
            if let Some(window) = gui_window {
                config.gui_window_minutes = window;
            }
            run(config, once, !no_dashboard && !once).await
        }
        Commands::Export { data_dir, output } => {
            let config = Config::from_config(cli.config.as_deref())?;
            export(config, data_dir, output).await
        }
        Commands::Speedtest { timeout, server } => speedtest(timeout, server).await,
    }
}

async fn run(config: Config, once: bool, dashboard: bool) -> Result<()> {
    let _log_guard = logger::init(LogOptions { file: Some(config.log_path.clone()), console: !dashboard })
        .context("failed to initialize logging")?;
    config.validate()?;
    debug!("Configuration:\n{config}");

    info!("Starting network monitor");
    info!("Logging to {}", config.log_path.display());
    info!("Database at {}", config.db_path.display());
    if config.enable_speedtest {
        info!("Speedtests enabled every {:.0} seconds", config.speedtest_interval_seconds);
    } else {
        info!("Speedtests disabled");
    }

    let store = Arc::new(
        Store::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open {}", config.db_path.display()))?,
    );
    let mut monitor = Monitor::from_config(&config, store, Arc::new(ProcessRunner));
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping monitor (Ctrl+C pressed)");
            interrupt.cancel();
        }
    });

    let token = cancel.clone();
    let mut monitor_task = tokio::spawn(async move { monitor.run_shared(token, once).await });

    if !dashboard {
        return Ok(monitor_task.await?.context("monitoring stopped")?);
    }

    let reader = Arc::new(Store::open_reader(&config.db_path).await?);
    let options = DashboardOptions {
        target_names: config.targets().into_iter().map(|target| target.name).collect(),
        refresh: config.gui_refresh(),
        window: config.gui_window(),
        probe_interval: config.interval(),
    };
    let dashboard_result = run_dashboard(reader, options, cancel.clone()).await;
    cancel.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut monitor_task).await {
        Ok(joined) => joined?.context("monitoring stopped")?,
        Err(_) => {
            warn!("Monitor did not stop within {:?}, abandoning it", SHUTDOWN_GRACE);
            monitor_task.abort();
        }
    }
    dashboard_result
}

async fn export(config: Config, data_dir: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let _log_guard = logger::init(LogOptions::default()).context("failed to initialize logging")?;
    let data_dir = data_dir.unwrap_or(config.export.data_dir);
    let output = output.unwrap_or(config.export.output);

    let bundle = load_data(&data_dir, &config.export.labels).await?;
    let document = build_export(&bundle, &config.export.target_hints);
    write_export(&document, &output)?;

    println!("Exported data to {}", output.display());
    println!("  - {} ping results", bundle.ping_count());
    println!("  - {} speedtest results", bundle.speedtest_count());
    println!("  - {} dataset spans", document.dataset_spans.len());
    Ok(())
}

async fn speedtest(timeout: f64, server: Option<String>) -> Result<()> {
    let _log_guard = logger::init(LogOptions::default()).context("failed to initialize logging")?;
    if !timeout.is_finite() || timeout <= 0.0 {
        anyhow::bail!("timeout must be a positive number of seconds, got {timeout}");
    }
    let timeout = Duration::try_from_secs_f64(timeout).context("timeout is too large")?;

    let mut tester = SpeedTester::new(timeout, server, Arc::new(ProcessRunner));
    let result = tester.run().await;

    let show = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_else(|| "None".into());
    println!("Tool: {}", result.tool.as_deref().unwrap_or("not found"));
    println!("Success: {}", result.success);
    println!("Download Mbps: {}", show(result.download_mbps));
    println!("Upload Mbps: {}", show(result.upload_mbps));
    println!("Ping ms: {}", show(result.ping_ms));
    println!("Error: {}", result.error.as_deref().unwrap_or("None"));

    if let Some(throughput) = result.throughput().filter(|_| result.success) {
        println!("\nParsed result JSON:");
        println!("{}", serde_json::to_string_pretty(&throughput)?);
    }
    Ok(())
}
