//! Materialised rollups. Pure projections of the activation ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::SensorId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub sensor_id: SensorId,
    pub activation_count: u64,
    pub completed_count: u64,
    pub avg_duration_ms: f64,
    pub peak_hour: Option<u32>,
    pub completion_rate: f64,
    pub trend_pct: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourlyStat {
    pub date: NaiveDate,
    pub sensor_id: SensorId,
    pub hour: u32,
    pub activation_count: u64,
    pub completed_count: u64,
    pub avg_duration_ms: f64,
    pub is_peak: bool,
    pub computed_at: DateTime<Utc>,
}
