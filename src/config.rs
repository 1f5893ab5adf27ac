//! Configuration module for the device fleet simulator.
//!
//! This module provides environment-based configuration: fleet size,
//! collector URL and reporting interval are required, everything else
//! falls back to sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Endpoint path appended to the collector base URL
const INFORMATIONS_PATH: &str = "/informations";

/// Default location of the persisted fleet registry
const DEFAULT_REGISTRY_PATH: &str = "devices.json";

/// Default delay between successive device activations in milliseconds
const DEFAULT_STAGGER_MS: u64 = 500;

/// Upper bound for the startup stagger so large fleets still come up quickly
const MAX_STAGGER_MS: u64 = 10_000;

/// Longest accepted report interval (one day) so timer deadlines stay representable
const MAX_REPORT_INTERVAL_SECS: u64 = 86_400;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const FLEET_SIZE_VAR: &str = "DEVICES_QUANTITY";
const BASE_URL_VAR: &str = "BASE_URL";
const REPORT_INTERVAL_VAR: &str = "DEVICES_PERIODIC_INTERVAL_INFORM";
const REGISTRY_PATH_VAR: &str = "DEVICES_REGISTRY_PATH";
const STAGGER_VAR: &str = "DEVICES_STARTUP_STAGGER_MS";
const REQUEST_TIMEOUT_VAR: &str = "DEVICES_REQUEST_TIMEOUT_SECS";

/// Configuration for the device fleet simulator.
///
/// Settings are read from environment variables:
/// - `DEVICES_QUANTITY`: number of devices to simulate (required)
/// - `BASE_URL`: collector base URL (required)
/// - `DEVICES_PERIODIC_INTERVAL_INFORM`: seconds between reports, at most one day (required)
/// - `DEVICES_REGISTRY_PATH`: fleet registry file (default: devices.json)
/// - `DEVICES_STARTUP_STAGGER_MS`: delay between device activations (default: 500)
/// - `DEVICES_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of devices in the fleet
    pub fleet_size: usize,

    /// Base URL of the telemetry collector
    pub base_url: String,

    /// Full URL that snapshots are posted to
    pub informations_url: String,

    /// Period of each device's report timer
    pub report_interval: Duration,

    /// Path of the persisted fleet registry
    pub registry_path: PathBuf,

    /// Delay inserted between successive device activations
    pub stagger: Duration,

    /// HTTP request timeout duration
    pub request_timeout: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or any
    /// variable holds a value that does not parse or is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use device_fleet_simulator::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Simulating {} devices", config.fleet_size);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key/value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fleet_size = parse_positive(&lookup, FLEET_SIZE_VAR)? as usize;

        let base_url = required(&lookup, BASE_URL_VAR)?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::for_var(BASE_URL_VAR, "must not be empty"));
        }
        let informations_url = format!("{}{}", base_url, INFORMATIONS_PATH);

        let report_interval_secs = parse_positive(&lookup, REPORT_INTERVAL_VAR)?;
        if report_interval_secs > MAX_REPORT_INTERVAL_SECS {
            return Err(ConfigError::for_var(
                REPORT_INTERVAL_VAR,
                format!(
                    "report interval {}s exceeds maximum ({}s)",
                    report_interval_secs, MAX_REPORT_INTERVAL_SECS
                ),
            ));
        }
        let report_interval = Duration::from_secs(report_interval_secs);

        let registry_path = lookup(REGISTRY_PATH_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_REGISTRY_PATH.to_string());

        let stagger_ms = match lookup(STAGGER_VAR) {
            Some(value) => {
                let ms = parse_number(STAGGER_VAR, &value)?;
                if ms > MAX_STAGGER_MS {
                    return Err(ConfigError::for_var(
                        STAGGER_VAR,
                        format!("stagger {}ms exceeds maximum ({}ms)", ms, MAX_STAGGER_MS),
                    ));
                }
                ms
            }
            None => DEFAULT_STAGGER_MS,
        };

        let request_timeout_secs = match lookup(REQUEST_TIMEOUT_VAR) {
            Some(_) => parse_positive(&lookup, REQUEST_TIMEOUT_VAR)?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            fleet_size,
            base_url,
            informations_url,
            report_interval,
            registry_path: PathBuf::from(registry_path),
            stagger: Duration::from_millis(stagger_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

fn required<F>(lookup: &F, env_var: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(env_var).ok_or_else(|| ConfigError::for_var(env_var, "is not set"))
}

fn parse_number(env_var: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value)))
}

/// Parse a required variable that must be an integer greater than 0.
fn parse_positive<F>(lookup: &F, env_var: &str) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = required(lookup, env_var)?;
    let number = parse_number(env_var, &value)?;

    if number == 0 {
        return Err(ConfigError::for_var(env_var, "must be greater than 0"));
    }

    Ok(number)
}
