//! surface-shadow CLI
//!
//! Runs a session over a MIDI control surface, or replays/REPLs messages
//! without hardware.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use surface_shadow::catalog::{load_catalog, Catalog};
use surface_shadow::cli;
use surface_shadow::config::{AppConfig, ConfigWatcher};
use surface_shadow::matcher::ControlMatcher;
use surface_shadow::ports::{self, MidiFeedbackSink, RawMessage};
use surface_shadow::session::Session;
use surface_shadow::shadow::{LogSink, OutputSink};

/// surface-shadow - match control surface messages and dispatch them to pages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SURFACE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Load the device catalog and print its controls
    #[arg(long)]
    check_device: bool,

    /// Feed a file of hex messages through the session and exit
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Interactive session without hardware
    #[arg(long)]
    repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard = init_logging(&args)?;

    info!("Starting surface-shadow v{}", env!("CARGO_PKG_VERSION"));

    if args.list_ports {
        ports::list_ports_formatted();
        return Ok(());
    }

    if args.check_device {
        let path = config_catalog_path(&args.config).await;
        let catalog = load_catalog(path.as_deref()).await?;
        check_device(&catalog)?;
        return Ok(());
    }

    if args.replay.is_some() || args.repl {
        let config = AppConfig::load(&args.config.to_string_lossy()).await?;
        let mut session = build_session(&config).await?;

        if let Some(path) = &args.replay {
            let count = cli::replay(&mut session, path).await?;
            info!("Replayed {} message(s)", count);
        }
        if args.repl {
            cli::run_repl(&mut session)?;
        }
        return Ok(());
    }

    let (config_watcher, initial_config) = ConfigWatcher::new(&args.config).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    run_app(initial_config, config_watcher, shutdown_signal()).await?;

    info!("surface-shadow shutdown complete");
    Ok(())
}

async fn build_session(config: &AppConfig) -> Result<Session> {
    let catalog = load_catalog(config.device.catalog.as_deref()).await?;
    let matcher = catalog
        .build_matcher()
        .with_context(|| format!("Failed to build device '{}'", config.device.name))?;

    let session = Session::new(config, matcher)?;
    info!(
        "Session ready: {} page(s), active page {}",
        session.pages().len(),
        session.active_page_name()
    );
    Ok(session)
}

async fn run_app(
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let mut session = build_session(&config).await?;

    let input_port = config
        .midi
        .input_port
        .as_deref()
        .context("midi.input_port is required for a live session")?;
    let (tx, mut rx) = mpsc::channel::<RawMessage>(1000);
    let _input = ports::connect_input(input_port, tx)?;

    let mut sink: Box<dyn OutputSink> = match config.midi.output_port.as_deref() {
        Some(pattern) => Box::new(MidiFeedbackSink::connect(pattern, session.matcher())?),
        None => {
            info!("No output port configured, display state is only logged");
            Box::new(LogSink)
        }
    };
    session.apply(sink.as_mut());

    let mut ticker = tokio::time::interval(Duration::from_millis(config.device.tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Ready to process MIDI events!");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                debug!("Received after {:?}", message.timestamp.elapsed());
                session.on_message(&message.data);
                for action in session.drain_actions() {
                    info!("{}", action);
                }
                session.apply(sink.as_mut());
            }

            _ = ticker.tick() => {
                if session.tick() {
                    session.apply(sink.as_mut());
                }
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("Configuration file changed, rebuilding pages...");
                match session.rebuild(&new_config) {
                    Ok(()) => {
                        info!("Pages rebuilt, active page {}", session.active_page_name());
                        session.apply(sink.as_mut());
                    }
                    Err(e) => warn!("Failed to rebuild pages (keeping old pages): {:#}", e),
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    Ok(())
}

/// Catalog path from the config file, when the config exists and names one
async fn config_catalog_path(config: &std::path::Path) -> Option<PathBuf> {
    let config = AppConfig::load(&config.to_string_lossy()).await.ok()?;
    config.device.catalog
}

fn check_device(catalog: &Catalog) -> Result<()> {
    use colored::*;

    println!("\n{}", "=== Device Catalog ===".bold().cyan());

    let matcher = catalog.build_matcher()?;
    let controls = matcher.controls();
    println!("  Total controls: {}", controls.len().to_string().green());

    for group in matcher.groups() {
        println!("\n  {}", group.yellow());
        for control in matcher.controls_in(Some(group.as_str())) {
            let address = control
                .pattern()
                .feedback_address()
                .map(|(s, d)| match d {
                    Some(d) => format!("{:02X} {:02X}", s, d),
                    None => format!("{:02X}", s),
                })
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {:<12} {:<12} {:<8} {:<28} feedback {}",
                control.name(),
                control.kind().to_string(),
                control.coordinate().to_string(),
                control.pattern().to_string(),
                address
            );
        }
    }

    println!("\n{}", "Device catalog OK".green().bold());
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    let console = if args.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    let (file, guard) = match &args.log_file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
            let name = path
                .file_name()
                .context("--log-file must name a file")?;
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| std::path::Path::new(".")),
                name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
