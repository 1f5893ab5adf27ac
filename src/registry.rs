//! Fleet registry persistence.
//!
//! The registry is a JSON file holding every device identity this simulator
//! has ever created, so restarts report under the same serial numbers
//! instead of spawning a new fleet.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::device::{DeviceIdentity, DeviceType};

/// Prefix of synthesized serial numbers
const SERIAL_PREFIX: &str = "DEVICE_";

/// Range of capacity totals for synthesized identities
const CAPACITY_MIN: u32 = 1000;
const CAPACITY_MAX: u32 = 2000;

/// Errors that can occur while reading or writing the registry file.
#[derive(Debug)]
pub enum RegistryError {
    /// Reading or writing the file failed
    Io { path: PathBuf, source: io::Error },

    /// The file exists but is not a valid registry document
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The identities could not be encoded for writing
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Io { path, source } => {
                write!(f, "Registry I/O error at {}: {}", path.display(), source)
            }
            RegistryError::Parse { path, source } => {
                write!(f, "Invalid registry file {}: {}", path.display(), source)
            }
            RegistryError::Serialize { path, source } => {
                write!(f, "Failed to serialize registry for {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io { source, .. } => Some(source),
            RegistryError::Parse { source, .. } => Some(source),
            RegistryError::Serialize { source, .. } => Some(source),
        }
    }
}

/// Accepted on-disk layouts: a plain array, or an object keyed by index.
#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryDocument {
    List(Vec<serde_json::Value>),
    Indexed(BTreeMap<String, serde_json::Value>),
}

impl RegistryDocument {
    fn into_entries(self) -> Vec<serde_json::Value> {
        match self {
            RegistryDocument::List(entries) => entries,
            RegistryDocument::Indexed(map) => {
                let mut keyed: Vec<(String, serde_json::Value)> = map.into_iter().collect();
                // Numeric keys in numeric order, anything else after them
                keyed.sort_by_key(|(key, _)| (key.parse::<u64>().unwrap_or(u64::MAX), key.clone()));
                keyed.into_iter().map(|(_, value)| value).collect()
            }
        }
    }
}

/// Outcome of matching the persisted registry against a requested fleet size.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Identities to simulate in this run, exactly as many as requested
    pub fleet: Vec<DeviceIdentity>,

    /// Full registry to persist: every persisted entry plus new ones
    pub registry: Vec<DeviceIdentity>,

    /// Number of identities created during reconciliation
    pub synthesized: usize,
}

/// Take up to `requested` identities from `persisted`, synthesizing the rest.
///
/// Persisted entries beyond `requested` stay in the registry untouched.
/// New identities get round-robin device types by fleet index and random
/// capacity totals.
pub fn reconcile(persisted: Vec<DeviceIdentity>, requested: usize) -> Reconciliation {
    reconcile_with(persisted, requested, &mut rand::thread_rng())
}

/// Same as [`reconcile`], drawing capacity totals from `rng`.
pub fn reconcile_with(
    persisted: Vec<DeviceIdentity>,
    requested: usize,
    rng: &mut impl Rng,
) -> Reconciliation {
    let mut registry = persisted;
    let mut taken: HashSet<String> = registry.iter().map(|id| id.serial_number.clone()).collect();

    let reused = registry.len().min(requested);
    let mut fleet: Vec<DeviceIdentity> = registry[..reused].to_vec();

    for index in reused..requested {
        let serial_number = unique_serial(index, &taken);
        taken.insert(serial_number.clone());

        let identity = DeviceIdentity::new(
            serial_number,
            DeviceType::round_robin(index),
            rng.gen_range(CAPACITY_MIN..CAPACITY_MAX) as f64,
            rng.gen_range(CAPACITY_MIN..CAPACITY_MAX) as f64,
        );
        debug!(
            serial_number = %identity.serial_number,
            device_type = %identity.device_type,
            "Synthesized device identity"
        );

        registry.push(identity.clone());
        fleet.push(identity);
    }

    Reconciliation {
        fleet,
        registry,
        synthesized: requested - reused,
    }
}

/// `DEVICE_{index}`, bumped past any serial already in use.
fn unique_serial(index: usize, taken: &HashSet<String>) -> String {
    (index..)
        .map(|n| format!("{}{}", SERIAL_PREFIX, n))
        .find(|serial| !taken.contains(serial))
        .unwrap_or_else(|| format!("{}{}", SERIAL_PREFIX, index))
}

/// File-backed store of device identities.
#[derive(Debug, Clone)]
pub struct FleetRegistry {
    path: PathBuf,
}

impl FleetRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all persisted identities.
    ///
    /// A missing file is a first run and yields an empty list. Entries that
    /// do not describe a valid identity are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the file cannot be read or is not a JSON
    /// array or index-keyed object.
    pub fn load(&self) -> Result<Vec<DeviceIdentity>, RegistryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No fleet registry found, starting fresh");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let document: RegistryDocument =
            serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let identities: Vec<DeviceIdentity> = document
            .into_entries()
            .into_iter()
            .enumerate()
            .filter_map(|(position, entry)| match serde_json::from_value(entry) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!(position, error = %e, "Skipping invalid registry entry");
                    None
                }
            })
            .collect();

        info!(
            path = %self.path.display(),
            devices = identities.len(),
            "Fleet registry loaded"
        );
        Ok(identities)
    }

    /// Replace the registry file with `identities`.
    ///
    /// The document is written to a sibling temporary file first and then
    /// renamed over the registry.
    pub fn save(&self, identities: &[DeviceIdentity]) -> Result<(), RegistryError> {
        let io_err = |source: io::Error| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(identities).map_err(|source| {
            RegistryError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, content).map_err(io_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        info!(
            path = %self.path.display(),
            devices = identities.len(),
            "Fleet registry saved"
        );
        Ok(())
    }

    /// Load the registry, reconcile it to `requested` devices and write the
    /// full registry back. Returns the fleet for this run.
    ///
    /// The file is rewritten on every call, so entries skipped while loading
    /// are dropped from disk.
    pub fn prepare(&self, requested: usize) -> Result<Vec<DeviceIdentity>, RegistryError> {
        let persisted = self.load()?;
        let persisted_len = persisted.len();

        let reconciliation = reconcile(persisted, requested);
        info!(
            requested,
            persisted = persisted_len,
            reused = requested - reconciliation.synthesized,
            synthesized = reconciliation.synthesized,
            "Fleet reconciled"
        );

        self.save(&reconciliation.registry)?;

        Ok(reconciliation.fleet)
    }
}
