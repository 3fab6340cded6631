//! Activation ledger records.
//!
//! One record spans the interval a sensor reported "active" (product lifted).
//! `video_path` is captured when the record opens and is never rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SensorId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecord {
    pub id: i64,
    pub sensor_id: SensorId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub completed: bool,
    pub video_path: Option<String>,
}

impl ActivationRecord {
    pub fn is_open(&self) -> bool {
        !self.completed
    }
}

/// Selection over the ledger. Time bounds apply to `start_time`, `from`
/// inclusive and `to` exclusive.
#[derive(Debug, Clone, Default)]
pub struct ActivationFilter {
    pub sensor_id: Option<SensorId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
    pub limit: Option<usize>,
    pub newest_first: bool,
}

impl ActivationFilter {
    pub fn in_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            newest_first: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &ActivationRecord) -> bool {
        if let Some(sensor_id) = self.sensor_id {
            if record.sensor_id != sensor_id {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.start_time < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.start_time >= to {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            if record.completed != completed {
                return false;
            }
        }
        true
    }
}

/// Flat row handed to spreadsheet/CSV formatters and the export push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportRow {
    pub id: i64,
    pub sensor_id: SensorId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub video_path: Option<String>,
}

impl ExportRow {
    /// Returns `None` for open activations, which are never exported.
    pub fn from_record(record: &ActivationRecord) -> Option<Self> {
        let end_time = record.end_time.filter(|_| record.completed)?;
        Some(Self {
            id: record.id,
            sensor_id: record.sensor_id,
            start_time: record.start_time,
            end_time,
            duration_ms: record.duration_ms,
            video_path: record.video_path.clone(),
        })
    }
}
