use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackerStats;

/// Timing of one processed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTiming {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub changed: bool,
    pub opened: usize,
    pub closed: usize,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub total_memory_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub version: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub host_uptime_secs: u64,
    pub process_uptime_secs: u64,
    pub system: SystemMetrics,
    pub database_path: String,
    pub tracker: TrackerStats,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub recent_snapshots: Vec<SnapshotTiming>,
}
