use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::db::SensorId;

/// Produces the list of currently active sensors on demand.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn current_snapshot(&self) -> Result<Vec<SensorId>>;
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    active_sensors: Vec<SensorId>,
}

/// Reads the `{"active_sensors": [...]}` file the GPIO monitor rewrites on
/// every pin change. Extra keys (per-pin raw status) are ignored.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for JsonFileSource {
    async fn current_snapshot(&self) -> Result<Vec<SensorId>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read snapshot file {}", self.path.display()))?;
        // The monitor rewrites in place, so a torn read surfaces here as a
        // parse error and the tick is skipped.
        let parsed: SnapshotFile = serde_json::from_str(&contents)
            .with_context(|| format!("malformed snapshot file {}", self.path.display()))?;
        Ok(parsed.active_sensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_active_sensors_and_ignores_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.json");
        std::fs::write(
            &path,
            r#"{"active_sensors": [27, 5], "status": {"17": 1, "27": 0, "5": 0}}"#,
        )
        .unwrap();

        let source = JsonFileSource::new(path);
        assert_eq!(source.current_snapshot().await.unwrap(), vec![27, 5]);
    }

    #[tokio::test]
    async fn missing_or_torn_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.json");
        let source = JsonFileSource::new(path.clone());
        assert!(source.current_snapshot().await.is_err());

        std::fs::write(&path, r#"{"active_sens"#).unwrap();
        assert!(source.current_snapshot().await.is_err());
    }
}
