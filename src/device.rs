//! Device state model for simulated fleet members.
//!
//! Each [`Device`] pairs an immutable [`DeviceIdentity`] with mutable metric
//! state. Every call to [`Device::report`] advances the state by one step of a
//! bounded random walk and returns an immutable [`Snapshot`] for delivery.

use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound (exclusive) of the starting load and the load re-clamp floor
const LOAD_SPAN: f64 = 2.0;

/// Upper bound (exclusive) of memory offsets, deltas and the memory floor
const MEMORY_SPAN: f64 = 100.0;

/// Upper bound (exclusive) of the random disk usage subtracted from the total
const DISK_USED_SPAN: f64 = 100.0;

/// Upper bound (exclusive) of the starting temperature, deltas and floor
const TEMPERATURE_SPAN: f64 = 50.0;

/// Upper bound (exclusive) of per-report upload/download increments
const TRAFFIC_SPAN: u64 = 100;

/// Kinds of simulated devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    TemperatureSensor,
    HumiditySensor,
    PressureSensor,
    Motor,
}

impl DeviceType {
    /// All device types, in the order new identities cycle through them.
    pub const ALL: [DeviceType; 4] = [
        DeviceType::TemperatureSensor,
        DeviceType::HumiditySensor,
        DeviceType::PressureSensor,
        DeviceType::Motor,
    ];

    /// Device type assigned to the identity at `index` of the fleet.
    pub fn round_robin(index: usize) -> DeviceType {
        Self::ALL[index % Self::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::TemperatureSensor => "temperature_sensor",
            DeviceType::HumiditySensor => "humidity_sensor",
            DeviceType::PressureSensor => "pressure_sensor",
            DeviceType::Motor => "motor",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable attributes of a device, persisted in the fleet registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Serial number, unique within the fleet
    pub serial_number: String,

    /// Kind of device
    pub device_type: DeviceType,

    /// Total memory capacity
    pub memory_total: f64,

    /// Total disk capacity
    pub disk_total: f64,
}

impl DeviceIdentity {
    pub fn new(
        serial_number: impl Into<String>,
        device_type: DeviceType,
        memory_total: f64,
        disk_total: f64,
    ) -> Self {
        Self {
            serial_number: serial_number.into(),
            device_type,
            memory_total,
            disk_total,
        }
    }
}

/// Type-dependent readings attached to every snapshot.
///
/// Serialized as the bare object of the variant's fields, e.g.
/// `{"rpm": 2500, "vibration": 3}` for a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CustomMetrics {
    TemperatureSensor { humidity: u32, pressure: u32 },
    HumiditySensor { humidity: u32 },
    PressureSensor { pressure: u32 },
    Motor { rpm: u32, vibration: u32 },
}

impl CustomMetrics {
    /// Draw fresh readings for a device of the given type.
    pub fn generate(device_type: DeviceType, rng: &mut impl Rng) -> Self {
        match device_type {
            DeviceType::TemperatureSensor => CustomMetrics::TemperatureSensor {
                humidity: rng.gen_range(0..100),
                pressure: rng.gen_range(900..1900),
            },
            DeviceType::HumiditySensor => CustomMetrics::HumiditySensor {
                humidity: rng.gen_range(0..100),
            },
            DeviceType::PressureSensor => CustomMetrics::PressureSensor {
                pressure: rng.gen_range(900..1900),
            },
            DeviceType::Motor => CustomMetrics::Motor {
                rpm: rng.gen_range(1000..4000),
                vibration: rng.gen_range(0..10),
            },
        }
    }
}

/// Telemetry payload produced by one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub serial_number: String,
    pub load: f64,
    pub memory_free: f64,
    pub memory_total: f64,
    pub disk_free: f64,
    pub disk_total: f64,
    pub upload: u64,
    pub download: u64,
    pub temperature: f64,
    pub custom_metrics: CustomMetrics,
    /// Seconds since the device booted
    pub uptime: u64,
}

/// A simulated device with evolving metric state.
///
/// A device is owned by exactly one scheduler worker, so reports for the
/// same device never overlap.
#[derive(Debug, Clone)]
pub struct Device {
    identity: DeviceIdentity,
    name: String,
    boot_time: DateTime<Utc>,
    boot_instant: Instant,
    last_heartbeat: DateTime<Utc>,

    load: f64,
    memory_free: f64,
    disk_free: f64,
    upload: u64,
    download: u64,
    temperature: f64,
}

impl Device {
    /// Boot a device with plausible random starting values.
    pub fn new(identity: DeviceIdentity) -> Self {
        Self::new_with(identity, &mut rand::thread_rng())
    }

    /// Boot a device drawing its starting values from `rng`.
    pub fn new_with(identity: DeviceIdentity, rng: &mut impl Rng) -> Self {
        let now = Utc::now();
        let name = format!("{}_{}", identity.device_type, identity.serial_number);

        let load = round2(rng.gen_range(0.0..LOAD_SPAN));
        let memory_free = identity.memory_total - rng.gen_range(0.0..MEMORY_SPAN).floor();
        let disk_free = identity.disk_total - disk_used(rng, identity.disk_total);
        let temperature = rng.gen_range(0.0..TEMPERATURE_SPAN).floor();

        Self {
            identity,
            name,
            boot_time: now,
            boot_instant: Instant::now(),
            last_heartbeat: now,
            load,
            memory_free,
            disk_free,
            upload: 0,
            download: 0,
            temperature,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    pub fn device_type(&self) -> DeviceType {
        self.identity.device_type
    }

    /// Display name, `{device_type}_{serial_number}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn boot_time(&self) -> DateTime<Utc> {
        self.boot_time
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    /// Whole seconds elapsed since the device booted.
    pub fn uptime(&self) -> u64 {
        self.boot_instant.elapsed().as_secs()
    }

    /// Draw fresh type-dependent readings without touching device state.
    pub fn generate_custom_metrics(&self) -> CustomMetrics {
        CustomMetrics::generate(self.identity.device_type, &mut rand::thread_rng())
    }

    /// Advance the metric state by one step and return the resulting snapshot.
    pub fn report(&mut self) -> Snapshot {
        self.report_with(&mut rand::thread_rng())
    }

    /// Same as [`Device::report`], drawing randomness from `rng`.
    ///
    /// Load, free memory and temperature drift by a signed random delta and
    /// are then raised to at least a fresh random floor. Disk usage is
    /// resampled, and traffic counters only ever grow.
    pub fn report_with(&mut self, rng: &mut impl Rng) -> Snapshot {
        self.last_heartbeat = Utc::now();

        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

        self.load += round2(sign * rng.gen_range(0.0..LOAD_SPAN));
        self.memory_free += sign * rng.gen_range(0.0..MEMORY_SPAN).floor();
        self.temperature += sign * rng.gen_range(0.0..TEMPERATURE_SPAN).floor();
        self.disk_free = self.identity.disk_total - disk_used(rng, self.identity.disk_total);
        self.upload += rng.gen_range(0..TRAFFIC_SPAN);
        self.download += rng.gen_range(0..TRAFFIC_SPAN);

        // Floors are resampled every step, so these values drift upward over
        // long runs instead of settling around a baseline.
        self.load = round2(rng.gen_range(0.0..LOAD_SPAN).max(self.load));
        self.memory_free = round2(rng.gen_range(0.0..MEMORY_SPAN).max(self.memory_free));
        self.temperature = round2(
            round2(rng.gen_range(0.0..TEMPERATURE_SPAN)).max(self.temperature),
        );

        Snapshot {
            serial_number: self.identity.serial_number.clone(),
            load: self.load,
            memory_free: self.memory_free,
            memory_total: self.identity.memory_total,
            disk_free: self.disk_free,
            disk_total: self.identity.disk_total,
            upload: self.upload,
            download: self.download,
            temperature: self.temperature,
            custom_metrics: CustomMetrics::generate(self.identity.device_type, rng),
            uptime: self.uptime(),
        }
    }
}

/// Whole-number disk usage, never more than the disk holds.
fn disk_used(rng: &mut impl Rng, disk_total: f64) -> f64 {
    rng.gen_range(0.0..DISK_USED_SPAN)
        .floor()
        .min(disk_total.max(0.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn identity(serial: &str, device_type: DeviceType) -> DeviceIdentity {
        DeviceIdentity::new(serial, device_type, 1500.0, 1800.0)
    }

    #[test]
    fn test_device_type_serialization() {
        assert_eq!(
            serde_json::to_string(&DeviceType::TemperatureSensor).unwrap(),
            r#""temperature_sensor""#
        );
        let motor: DeviceType = serde_json::from_str(r#""motor""#).unwrap();
        assert_eq!(motor, DeviceType::Motor);
    }

    #[test]
    fn test_round_robin_order() {
        assert_eq!(DeviceType::round_robin(0), DeviceType::TemperatureSensor);
        assert_eq!(DeviceType::round_robin(1), DeviceType::HumiditySensor);
        assert_eq!(DeviceType::round_robin(2), DeviceType::PressureSensor);
        assert_eq!(DeviceType::round_robin(3), DeviceType::Motor);
        assert_eq!(DeviceType::round_robin(4), DeviceType::TemperatureSensor);
    }

    #[test]
    fn test_identity_serialization() {
        let id = identity("DEVICE_0", DeviceType::HumiditySensor);
        let json = serde_json::to_string(&id).unwrap();

        assert!(json.contains(r#""serialNumber":"DEVICE_0""#));
        assert!(json.contains(r#""deviceType":"humidity_sensor""#));
        assert!(json.contains(r#""memoryTotal":1500.0"#));
        assert!(json.contains(r#""diskTotal":1800.0"#));
    }

    #[test]
    fn test_new_device_starting_values() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let device = Device::new_with(identity("DEVICE_0", DeviceType::Motor), &mut rng);

            assert!((0.0..=2.0).contains(&device.load));
            assert!(device.memory_free > 1400.0 && device.memory_free <= 1500.0);
            assert!(device.disk_free > 1700.0 && device.disk_free <= 1800.0);
            assert!((0.0..50.0).contains(&device.temperature));
            assert_eq!(device.upload, 0);
            assert_eq!(device.download, 0);
        }
    }

    #[test]
    fn test_device_name() {
        let device = Device::new(identity("DEVICE_3", DeviceType::Motor));
        assert_eq!(device.name(), "motor_DEVICE_3");
        assert_eq!(device.serial_number(), "DEVICE_3");
        assert_eq!(device.device_type(), DeviceType::Motor);
    }

    #[test]
    fn test_custom_metrics_fields_per_type() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            for device_type in DeviceType::ALL {
                let metrics = CustomMetrics::generate(device_type, &mut rng);
                let value = serde_json::to_value(metrics).unwrap();
                let fields = value.as_object().expect("metrics serialize as an object");
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();

                let expected: &[&str] = match device_type {
                    DeviceType::TemperatureSensor => &["humidity", "pressure"],
                    DeviceType::HumiditySensor => &["humidity"],
                    DeviceType::PressureSensor => &["pressure"],
                    DeviceType::Motor => &["rpm", "vibration"],
                };
                assert_eq!(names, expected);

                for (name, value) in fields {
                    let value = value.as_u64().expect("metric values are whole numbers");
                    let in_range = match name.as_str() {
                        "humidity" => value < 100,
                        "pressure" => (900..1900).contains(&value),
                        "rpm" => (1000..4000).contains(&value),
                        "vibration" => value < 10,
                        _ => false,
                    };
                    assert!(in_range, "{} = {} out of range", name, value);
                }
            }
        }
    }

    #[test]
    fn test_custom_metrics_serialization() {
        let metrics = CustomMetrics::Motor {
            rpm: 2500,
            vibration: 3,
        };
        assert_eq!(
            serde_json::to_string(&metrics).unwrap(),
            r#"{"rpm":2500,"vibration":3}"#
        );

        let metrics = CustomMetrics::PressureSensor { pressure: 1013 };
        assert_eq!(
            serde_json::to_string(&metrics).unwrap(),
            r#"{"pressure":1013}"#
        );
    }

    #[test]
    fn test_generate_custom_metrics_leaves_state_untouched() {
        let device = Device::new(identity("DEVICE_0", DeviceType::TemperatureSensor));
        let heartbeat = device.last_heartbeat();
        let (load, memory_free, temperature) = (device.load, device.memory_free, device.temperature);

        for _ in 0..50 {
            let metrics = device.generate_custom_metrics();
            assert!(matches!(metrics, CustomMetrics::TemperatureSensor { .. }));
        }

        assert_eq!(device.last_heartbeat(), heartbeat);
        assert_eq!(device.load, load);
        assert_eq!(device.memory_free, memory_free);
        assert_eq!(device.temperature, temperature);
    }

    #[test]
    fn test_disk_free_stays_within_capacity() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut device = Device::new_with(identity("DEVICE_0", DeviceType::PressureSensor), &mut rng);

        for _ in 0..1000 {
            let snapshot = device.report_with(&mut rng);
            assert!(snapshot.disk_free >= 0.0);
            assert!(snapshot.disk_free <= snapshot.disk_total);
        }
    }

    #[test]
    fn test_disk_free_with_tiny_disk() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut device = Device::new_with(
            DeviceIdentity::new("DEVICE_0", DeviceType::Motor, 10.0, 5.0),
            &mut rng,
        );

        for _ in 0..200 {
            let snapshot = device.report_with(&mut rng);
            assert!((0.0..=5.0).contains(&snapshot.disk_free));
        }
    }

    #[test]
    fn test_traffic_counters_never_decrease() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut device = Device::new_with(identity("DEVICE_0", DeviceType::Motor), &mut rng);
        let (mut upload, mut download) = (0, 0);

        for _ in 0..1000 {
            let snapshot = device.report_with(&mut rng);
            assert!(snapshot.upload >= upload);
            assert!(snapshot.download >= download);
            upload = snapshot.upload;
            download = snapshot.download;
        }
    }

    #[test]
    fn test_report_values_respect_floors() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut device = Device::new_with(identity("DEVICE_0", DeviceType::HumiditySensor), &mut rng);

        for _ in 0..500 {
            let snapshot = device.report_with(&mut rng);
            assert!(snapshot.load >= 0.0);
            assert!(snapshot.memory_free >= 0.0);
            assert!(snapshot.temperature >= 0.0);
            assert_eq!(snapshot.load, round2(snapshot.load));
            assert_eq!(snapshot.memory_total, 1500.0);
        }
    }

    #[test]
    fn test_report_step_bounds() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut device = Device::new_with(identity("DEVICE_0", DeviceType::Motor), &mut rng);
        let eps = 1e-6;

        let (mut load_moves, mut temperature_moves) = (0, 0);
        let (mut memory_rose, mut memory_fell) = (false, false);

        for _ in 0..500 {
            let (load, memory_free, temperature) = (device.load, device.memory_free, device.temperature);
            let snapshot = device.report_with(&mut rng);

            // One step moves by less than the span, or lands on a fresh floor below it
            assert!(snapshot.load >= load - LOAD_SPAN - eps, "{} -> {}", load, snapshot.load);
            assert!(snapshot.load <= (load + LOAD_SPAN).max(LOAD_SPAN) + eps, "{} -> {}", load, snapshot.load);
            assert!(snapshot.memory_free > memory_free - MEMORY_SPAN);
            assert!(snapshot.memory_free <= (memory_free + MEMORY_SPAN).max(MEMORY_SPAN));
            assert!(snapshot.temperature > temperature - TEMPERATURE_SPAN);
            assert!(snapshot.temperature <= (temperature + TEMPERATURE_SPAN).max(TEMPERATURE_SPAN));

            if snapshot.load != load {
                load_moves += 1;
            }
            if snapshot.temperature != temperature {
                temperature_moves += 1;
            }
            memory_rose |= snapshot.memory_free > memory_free + MEMORY_SPAN / 2.0;
            memory_fell |= snapshot.memory_free < memory_free - MEMORY_SPAN / 2.0;
        }

        assert!(load_moves > 400, "load moved on {} of 500 steps", load_moves);
        assert!(temperature_moves > 350, "temperature moved on {} of 500 steps", temperature_moves);
        assert!(memory_rose && memory_fell);
    }

    #[test]
    fn test_report_updates_heartbeat() {
        let mut device = Device::new(identity("DEVICE_0", DeviceType::Motor));
        let before = device.last_heartbeat();

        std::thread::sleep(Duration::from_millis(5));
        device.report();

        assert!(device.last_heartbeat() > before);
        assert!(device.boot_time() <= before);
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut device = Device::new(identity("DEVICE_1", DeviceType::HumiditySensor));
        let snapshot = device.report();
        let json = serde_json::to_value(&snapshot).unwrap();

        for key in [
            "serialNumber",
            "load",
            "memoryFree",
            "memoryTotal",
            "diskFree",
            "diskTotal",
            "upload",
            "download",
            "temperature",
            "customMetrics",
            "uptime",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["serialNumber"], "DEVICE_1");
        assert!(json["customMetrics"].get("humidity").is_some());
        assert!(json["customMetrics"].get("pressure").is_none());
    }

    #[test]
    fn test_uptime_is_monotonic() {
        let device = Device::new(identity("DEVICE_0", DeviceType::Motor));
        let first = device.uptime();
        std::thread::sleep(Duration::from_millis(1100));
        let second = device.uptime();

        assert!(second >= first);
        assert!(second >= 1);
    }
}
