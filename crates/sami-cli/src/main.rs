//! Command-line interface for the SAMI device pipeline.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sami_core::config::env_vars;
use sami_core::LoggingCallback;
use sami_devices::{
    AlertEvaluator, DefaultAdapterFactory, DeviceRegistry, DeviceSupervisor, FleetTracker, SampleClassifier,
};
use sami_storage::{EventQuery, EventStore, StoreCallback};

use crate::config::{AppConfig, SAMPLE_CONFIG};

/// SAMI - Poll cameras, RFID readers and GPS trackers and raise alerts.
#[derive(Parser, Debug)]
#[command(name = "sami")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start polling every enabled device until Ctrl-C.
    Run {
        /// Configuration file.
        #[arg(short, long, default_value = "sami.toml")]
        config: PathBuf,
        /// Override the data directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Seconds between status log lines.
        #[arg(long, default_value_t = 60)]
        status_interval: u64,
    },
    /// Check a configuration file and exit.
    Validate {
        #[arg(short, long, default_value = "sami.toml")]
        config: PathBuf,
    },
    /// Print an annotated example configuration.
    SampleConfig,
    /// Print stored events as JSON lines.
    Events {
        /// Data directory holding the event database.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Only events of this device.
        #[arg(short, long)]
        device: Option<String>,
        /// Only alerts.
        #[arg(long)]
        alerts: bool,
        /// Newest N events.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run {
            config,
            data_dir,
            status_interval,
        } => run(config, data_dir, status_interval).await,
        Command::Validate { config } => validate(config),
        Command::SampleConfig => {
            print!("{}", SAMPLE_CONFIG);
            Ok(())
        }
        Command::Events {
            data_dir,
            device,
            alerts,
            limit,
        } => list_events(data_dir, device, alerts, limit),
    }
}

fn init_logging(verbose: bool) {
    // JSON output for container deployments.
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_filter = if verbose { "sami=debug" } else { "sami=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = AppConfig::load(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn validate(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    println!(
        "{}: {} devices, {} vehicles, {} tags",
        path.display(),
        config.devices.len(),
        config.vehicles.len(),
        config.tags.len()
    );
    for device in &config.devices {
        println!(
            "  {:<16} {:<12} {}",
            device.device_id,
            device.kind().as_str(),
            if device.enabled { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}

async fn run(path: PathBuf, data_dir: Option<PathBuf>, status_interval: u64) -> Result<()> {
    let mut config = load_config(&path)?;
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }
    let data_dir = config.data_dir();

    let registry = Arc::new(DeviceRegistry::from_configs(config.devices.clone())?);

    let mut classifier_settings = config.classifier.clone();
    if classifier_settings.snapshot_dir.is_none() {
        classifier_settings.snapshot_dir = Some(data_dir.clone());
    }
    let classifier = SampleClassifier::new(classifier_settings, Arc::new(config.tag_directory()));

    let store = EventStore::open(data_dir.join("events"))
        .with_context(|| format!("Failed to open event store in {}", data_dir.display()))?;
    let fleet = Arc::new(FleetTracker::new(config.vehicles.clone()).with_history(Arc::new(store.clone())));

    let supervisor = DeviceSupervisor::new(
        registry.clone(),
        Arc::new(classifier),
        Arc::new(DefaultAdapterFactory::new()),
        config.supervisor,
    );
    let router = supervisor.router();
    router.register(Arc::new(StoreCallback::new(store)));
    router.register(Arc::new(AlertEvaluator::new(config.thresholds, registry)));
    router.register(fleet.clone());
    router.register(Arc::new(LoggingCallback::default()));

    let started = supervisor.start_all().await;
    tracing::info!(started, total = config.devices.len(), "SAMI pipeline running");

    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => log_status(&supervisor, &fleet),
        }
    }

    tracing::info!("Shutting down");
    supervisor.shutdown().await;
    Ok(())
}

fn log_status(supervisor: &DeviceSupervisor, fleet: &FleetTracker) {
    let status = supervisor.get_all_status();
    tracing::info!(
        running = status.running_devices,
        errors = status.error_devices,
        dispatched = status.router.dispatched,
        alerts = status.router.alerts,
        tracked_vehicles = fleet.get_all_vehicle_locations().len(),
        "Pipeline status"
    );
    for device in status.devices.iter().filter(|d| d.last_error.is_some()) {
        tracing::warn!(
            device_id = %device.device_id,
            state = device.state.as_str(),
            error = device.last_error.as_deref().unwrap_or_default(),
            "Device reported an error"
        );
    }
}

fn list_events(data_dir: Option<PathBuf>, device: Option<String>, alerts: bool, limit: usize) -> Result<()> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.data_dir()
        }
    };
    let store = EventStore::open(data_dir.join("events"))
        .with_context(|| format!("Failed to open event store in {}", data_dir.display()))?;

    let query = EventQuery {
        device_id: device,
        alerts_only: alerts,
        limit: Some(limit),
        ..Default::default()
    };
    for event in store.query(&query)? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
