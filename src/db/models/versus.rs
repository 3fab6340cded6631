use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SensorId;

/// Two or more sensors observed active in the same snapshot.
///
/// `sensor1_id < sensor2_id` always; `participants` holds every paired sensor
/// in ascending order and starts with those two.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersusRecord {
    pub id: i64,
    pub sensor1_id: SensorId,
    pub sensor2_id: SensorId,
    pub participants: Vec<SensorId>,
    pub timestamp: DateTime<Utc>,
}
