use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, to_sensor_id},
    models::{SensorId, SensorLabel, SensorVideo},
};
use crate::ledger::VideoDirectory;

fn row_to_label(row: &Row) -> Result<SensorLabel, rusqlite::Error> {
    let sensor_id: i64 = row.get("sensor_id")?;
    Ok(SensorLabel {
        sensor_id: to_sensor_id(sensor_id, "sensor_id").map_err(conversion_error)?,
        number_label: row.get("number_label")?,
        display_name: row.get("display_name")?,
    })
}

fn row_to_video(row: &Row) -> Result<SensorVideo, rusqlite::Error> {
    let sensor_id: i64 = row.get("sensor_id")?;
    Ok(SensorVideo {
        sensor_id: to_sensor_id(sensor_id, "sensor_id").map_err(conversion_error)?,
        video_path: row.get("video_path")?,
        description: row.get("description")?,
    })
}

impl Database {
    pub async fn assign_video(&self, video: SensorVideo) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sensor_videos (sensor_id, video_path, description)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(sensor_id) DO UPDATE SET
                    video_path = excluded.video_path,
                    description = excluded.description",
                params![video.sensor_id, video.video_path, video.description],
            )
            .with_context(|| format!("failed to assign video to sensor {}", video.sensor_id))?;
            Ok(())
        })
        .await
    }

    pub async fn list_videos(&self) -> Result<Vec<SensorVideo>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sensor_id, video_path, description FROM sensor_videos ORDER BY sensor_id",
            )?;
            let videos = stmt
                .query_map([], row_to_video)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(videos)
        })
        .await
    }

    /// Labels for every known sensor, ordered by id.
    pub async fn list_labels(&self) -> Result<Vec<SensorLabel>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sensor_id, number_label, display_name FROM sensor_labels ORDER BY sensor_id",
            )?;
            let labels = stmt
                .query_map([], row_to_label)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(labels)
        })
        .await
    }

    pub async fn set_display_name(
        &self,
        sensor_id: SensorId,
        display_name: Option<String>,
    ) -> Result<bool> {
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE sensor_labels SET display_name = ?1 WHERE sensor_id = ?2",
                params![display_name, sensor_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl VideoDirectory for Database {
    async fn video_for_sensor(&self, sensor_id: SensorId) -> Result<Option<String>> {
        self.execute(move |conn| {
            let path = conn
                .query_row(
                    "SELECT video_path FROM sensor_videos WHERE sensor_id = ?1",
                    params![sensor_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(path)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_support::temp_database;

    #[tokio::test]
    async fn assigned_video_is_returned() {
        let (_dir, db) = temp_database();
        assert_eq!(db.video_for_sensor(17).await.unwrap(), None);

        db.assign_video(SensorVideo {
            sensor_id: 17,
            video_path: "videos/serum.mp4".into(),
            description: None,
        })
        .await
        .unwrap();
        db.assign_video(SensorVideo {
            sensor_id: 17,
            video_path: "videos/serum-v2.mp4".into(),
            description: Some("holiday cut".into()),
        })
        .await
        .unwrap();

        assert_eq!(
            db.video_for_sensor(17).await.unwrap().as_deref(),
            Some("videos/serum-v2.mp4")
        );
        assert_eq!(db.list_videos().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn labels_are_seeded_and_renamable() {
        let (_dir, db) = temp_database();
        let labels = db.list_labels().await.unwrap();
        assert_eq!(labels.len(), 9);
        assert_eq!(labels[0].sensor_id, 5);
        assert_eq!(labels[0].best_name(), "Sensor 3");

        assert!(db.set_display_name(5, Some("Night cream".into())).await.unwrap());
        assert!(!db.set_display_name(99, Some("Ghost".into())).await.unwrap());

        let labels = db.list_labels().await.unwrap();
        assert_eq!(labels[0].best_name(), "Night cream");
    }
}
