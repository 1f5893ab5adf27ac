//! Device Fleet Simulator Library
//!
//! This library simulates a fleet of networked devices that periodically
//! report synthetic telemetry to a remote collector:
//!
//! - **config**: Environment-based configuration for the simulator
//! - **device**: Device identities and their evolving metric state
//! - **registry**: Persisted fleet identities reused across restarts
//! - **scheduler**: Per-device periodic reporting with staggered startup
//! - **client**: HTTP client posting snapshots to the collector
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use device_fleet_simulator::client::{deliver, TelemetryClient};
//! use device_fleet_simulator::config::Config;
//! use device_fleet_simulator::device::Device;
//! use device_fleet_simulator::registry::FleetRegistry;
//! use device_fleet_simulator::scheduler::{Scheduler, SchedulerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Reuse persisted identities, creating new ones as needed
//!     let registry = FleetRegistry::new(&config.registry_path);
//!     let fleet = registry.prepare(config.fleet_size).expect("Failed to prepare fleet");
//!     let devices: Vec<Device> = fleet.into_iter().map(Device::new).collect();
//!
//!     // Report until the process is stopped
//!     let client = Arc::new(TelemetryClient::new(&config).expect("Failed to create client"));
//!     let scheduler = Scheduler::new(SchedulerConfig::new(config.report_interval, config.stagger));
//!     scheduler
//!         .run(devices, move |snapshot| {
//!             let client = client.clone();
//!             async move { deliver(&client, snapshot).await }
//!         })
//!         .await;
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod device;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, TelemetryClient};
pub use config::{Config, ConfigError};
pub use device::{CustomMetrics, Device, DeviceIdentity, DeviceType, Snapshot};
pub use registry::{reconcile, FleetRegistry, Reconciliation, RegistryError};
pub use scheduler::{DeliveryError, Scheduler, SchedulerConfig, WorkerStats};
