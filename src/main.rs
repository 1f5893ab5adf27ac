//! Device Fleet Simulator - synthetic telemetry load generator
//!
//! This service simulates a fleet of sensors and motors. Each device keeps
//! its own drifting metric state and posts a snapshot to the collector on
//! an independent timer.
//!
//! ## Features
//!
//! - Fleet identities persisted across restarts
//! - One tokio task per device, staggered startup
//! - Per-device failure isolation: a failed POST is logged and skipped
//! - Graceful shutdown on Ctrl+C
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (and `.env`):
//!
//! - `DEVICES_QUANTITY`: Number of devices to simulate (required)
//! - `BASE_URL`: Collector base URL (required)
//! - `DEVICES_PERIODIC_INTERVAL_INFORM`: Seconds between reports, max 86400 (required)
//! - `DEVICES_REGISTRY_PATH`: Fleet registry file (default: devices.json)
//! - `DEVICES_STARTUP_STAGGER_MS`: Delay between device activations (default: 500)
//! - `DEVICES_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use device_fleet_simulator::client::{deliver, TelemetryClient};
use device_fleet_simulator::config::Config;
use device_fleet_simulator::device::Device;
use device_fleet_simulator::registry::FleetRegistry;
use device_fleet_simulator::scheduler::{Scheduler, SchedulerConfig};

/// Maximum time to wait for device workers after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real environment variables still apply
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Device Fleet Simulator...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                fleet_size = config.fleet_size,
                informations_url = %config.informations_url,
                interval_secs = config.report_interval.as_secs(),
                registry = %config.registry_path.display(),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let registry = FleetRegistry::new(&config.registry_path);
    let fleet = match registry.prepare(config.fleet_size) {
        Ok(fleet) => fleet,
        Err(e) => {
            error!(error = %e, "Failed to prepare fleet registry");
            std::process::exit(1);
        }
    };

    info!(
        devices = fleet.len(),
        interval_secs = config.report_interval.as_secs(),
        "Simulating device fleet"
    );

    let devices: Vec<Device> = fleet
        .into_iter()
        .map(|identity| {
            let device = Device::new(identity);
            info!(
                device = %device.name(),
                memory_total = device.identity().memory_total,
                disk_total = device.identity().disk_total,
                "Device created"
            );
            device
        })
        .collect();

    let client = match TelemetryClient::new(&config) {
        Ok(client) => {
            info!(
                informations_url = %client.informations_url(),
                timeout_secs = client.timeout().as_secs(),
                "HTTP client initialized"
            );
            Arc::new(client)
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let scheduler = Scheduler::new(SchedulerConfig::new(config.report_interval, config.stagger));
    let cancel = scheduler.cancellation_token();

    let scheduler_handle = tokio::spawn(scheduler.run(devices, move |snapshot| {
        let client = client.clone();
        async move { deliver(&client, snapshot).await }
    }));

    info!("Device Fleet Simulator running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    }

    cancel.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler_handle).await {
        Ok(Ok(stats)) => {
            for worker in &stats {
                info!(
                    serial_number = %worker.serial_number,
                    reports = worker.reports,
                    delivered = worker.delivered,
                    failed = worker.failed,
                    "Device totals"
                );
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Scheduler task panicked during shutdown");
        }
        Err(_) => {
            warn!("Scheduler shutdown timed out after {:?}", SHUTDOWN_TIMEOUT);
        }
    }

    info!("Device Fleet Simulator stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
