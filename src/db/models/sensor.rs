use serde::{Deserialize, Serialize};

/// GPIO pin number of a shelf sensor. Treated as an opaque key.
pub type SensorId = u32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorLabel {
    pub sensor_id: SensorId,
    pub number_label: String,
    pub display_name: Option<String>,
}

impl SensorLabel {
    pub fn best_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.number_label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorVideo {
    pub sensor_id: SensorId,
    pub video_path: String,
    pub description: Option<String>,
}
