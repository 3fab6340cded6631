use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::db::SensorId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerSettings {
    /// Shorter reported activations are rejected as noise.
    pub min_activation_ms: u64,
    /// Insert versus records only when the pairing state turns on.
    pub versus_on_transition_only: bool,
    /// Apply `min_activation_ms` to snapshot-closed activations as well.
    pub filter_snapshot_jitter: bool,
    /// Known sensor ids. Empty accepts any id.
    pub sensor_pins: Vec<SensorId>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            min_activation_ms: 5_000,
            versus_on_transition_only: false,
            filter_snapshot_jitter: false,
            sensor_pins: vec![17, 27, 5, 6, 13, 18, 22, 26, 19],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingSettings {
    /// JSON file holding `{"active_sensors": [...]}`. No sampler when unset.
    pub snapshot_file: Option<PathBuf>,
    pub interval_ms: u64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            snapshot_file: None,
            interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportingSettings {
    /// Collector URL for completed activations. No push when unset.
    pub endpoint: Option<String>,
    pub device_id: String,
    pub interval_secs: u64,
    pub window_secs: u64,
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            device_id: "kiosk-1".into(),
            interval_secs: 600,
            window_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsSettings {
    /// Daily/hourly rebuild period. Zero disables the job.
    pub refresh_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { refresh_secs: 900 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KioskSettings {
    pub tracker: TrackerSettings,
    /// Offset used for local day/hour bucketing.
    pub utc_offset_minutes: i32,
    pub sampling: SamplingSettings,
    pub reporting: ReportingSettings,
    pub metrics: MetricsSettings,
}

impl KioskSettings {
    pub fn local_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| anyhow!("utc_offset_minutes {} out of range", self.utc_offset_minutes))
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<KioskSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings file {}: {err}",
                    path.display()
                );
                KioskSettings::default()
            })
        } else {
            KioskSettings::default()
        };

        data.local_offset()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn snapshot(&self) -> Result<KioskSettings> {
        Ok(self.read()?.clone())
    }

    pub fn tracker(&self) -> Result<TrackerSettings> {
        Ok(self.read()?.tracker.clone())
    }

    pub fn update_tracker(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = self.write()?;
        guard.tracker = settings;
        self.persist(&guard)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, KioskSettings>> {
        self.data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, KioskSettings>> {
        self.data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn persist(&self, data: &KioskSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
