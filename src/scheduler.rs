//! Reporting scheduler driving every device on its own periodic timer.
//!
//! Each device is moved into a dedicated tokio task that owns it
//! exclusively: it reports once immediately, then once per interval, and
//! hands every snapshot to a delivery callback. Delivery failures are logged
//! and counted but never stop the worker or affect other devices.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{Device, Snapshot};

/// Error returned by a delivery callback.
pub type DeliveryError = Box<dyn std::error::Error + Send + Sync>;

/// Timing configuration shared by every device worker.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period between two reports of the same device
    pub interval: Duration,

    /// Delay between successive device activations at startup
    pub stagger: Duration,
}

impl SchedulerConfig {
    pub fn new(interval: Duration, stagger: Duration) -> Self {
        Self { interval, stagger }
    }
}

/// Per-device counters collected when a worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Serial number of the device the worker drove
    pub serial_number: String,

    /// Number of snapshots produced
    pub reports: u64,

    /// Number of snapshots the collector accepted
    pub delivered: u64,

    /// Number of failed deliveries
    pub failed: u64,
}

/// Drives a fleet of devices until cancelled.
///
/// # Example
///
/// ```no_run
/// use device_fleet_simulator::device::{Device, DeviceIdentity, DeviceType};
/// use device_fleet_simulator::scheduler::{DeliveryError, Scheduler, SchedulerConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = SchedulerConfig::new(Duration::from_secs(5), Duration::from_millis(500));
///     let scheduler = Scheduler::new(config);
///     let cancel = scheduler.cancellation_token();
///
///     let devices = vec![Device::new(DeviceIdentity::new(
///         "DEVICE_0",
///         DeviceType::Motor,
///         1500.0,
///         1500.0,
///     ))];
///
///     let handle = tokio::spawn(scheduler.run(devices, |snapshot| async move {
///         println!("{}: load {}", snapshot.serial_number, snapshot.load);
///         Ok::<(), DeliveryError>(())
///     }));
///
///     tokio::signal::ctrl_c().await.ok();
///     cancel.cancel();
///     handle.await.ok();
/// }
/// ```
pub struct Scheduler {
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops every worker when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Activate every device and run until the cancellation token fires.
    ///
    /// Devices are activated in order with `stagger` between activations.
    /// Each worker's timer starts at its own activation, so the stagger only
    /// spreads out first reports. Returns the stats of every activated
    /// worker, in activation order.
    pub async fn run<F, Fut>(self, devices: Vec<Device>, deliver: F) -> Vec<WorkerStats>
    where
        F: Fn(Snapshot) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
    {
        let total = devices.len();
        let mut workers: Vec<JoinHandle<WorkerStats>> = Vec::with_capacity(total);

        info!(
            devices = total,
            interval_secs = self.config.interval.as_secs_f64(),
            stagger_ms = self.config.stagger.as_millis() as u64,
            "Starting reporting scheduler"
        );

        for (position, device) in devices.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            workers.push(tokio::spawn(device_worker(
                device,
                self.config.interval,
                self.cancel.clone(),
                deliver.clone(),
            )));

            if position + 1 < total && !self.config.stagger.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.stagger) => {}
                }
            }
        }

        info!(activated = workers.len(), "All devices activated");

        let mut stats = Vec::with_capacity(workers.len());
        for worker in workers {
            match worker.await {
                Ok(worker_stats) => stats.push(worker_stats),
                Err(e) => warn!(error = %e, "Device worker panicked"),
            }
        }

        info!(workers = stats.len(), "Reporting scheduler stopped");
        stats
    }
}

/// Report loop for a single device.
///
/// Reports immediately, then on every interval tick until `cancel` fires.
/// Ticks missed while a slow delivery is in flight are delayed rather than
/// replayed in a burst.
pub async fn device_worker<F, Fut>(
    mut device: Device,
    interval: Duration,
    cancel: CancellationToken,
    deliver: F,
) -> WorkerStats
where
    F: Fn(Snapshot) -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    let mut stats = WorkerStats {
        serial_number: device.serial_number().to_string(),
        ..WorkerStats::default()
    };

    info!(
        device = %device.name(),
        serial_number = %stats.serial_number,
        "Device activated"
    );

    report_once(&mut device, &deliver, &mut stats).await;

    // An interval too large to schedule leaves the device idle until shutdown
    let Some(first_tick) = Instant::now().checked_add(interval) else {
        warn!(
            serial_number = %stats.serial_number,
            interval_secs = interval.as_secs(),
            "Report interval cannot be scheduled, no further reports"
        );
        cancel.cancelled().await;
        return stats;
    };

    let mut ticker = interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(serial_number = %stats.serial_number, "Device worker cancelled");
                break;
            }

            _ = ticker.tick() => {
                report_once(&mut device, &deliver, &mut stats).await;
            }
        }
    }

    stats
}

/// Produce one snapshot and hand it to `deliver`, recording the outcome.
async fn report_once<F, Fut>(device: &mut Device, deliver: &F, stats: &mut WorkerStats)
where
    F: Fn(Snapshot) -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    let snapshot = device.report();
    stats.reports += 1;

    match deliver(snapshot).await {
        Ok(()) => {
            stats.delivered += 1;
            info!(
                serial_number = %stats.serial_number,
                uptime_secs = device.uptime(),
                "Snapshot delivered"
            );
        }
        Err(e) => {
            stats.failed += 1;
            warn!(
                serial_number = %stats.serial_number,
                error = %e,
                "Failed to deliver snapshot"
            );
        }
    }
}
