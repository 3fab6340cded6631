use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        conversion_error, format_datetime, parse_datetime, parse_optional_datetime, to_i64,
        to_sensor_id, to_u64,
    },
    models::{ActivationFilter, ActivationRecord, SensorId, VersusRecord},
    repositories::versus::{insert_versus, select_versus},
};
use crate::ledger::{
    close_record, heal_record, is_jitter, AppliedTransition, CloseOutcome, Ledger, TransitionPlan,
};

const ACTIVATION_COLUMNS: &str =
    "id, sensor_id, start_time, end_time, duration_ms, completed, video_path";

fn row_to_activation(row: &Row) -> Result<ActivationRecord, rusqlite::Error> {
    let sensor_id: i64 = row.get("sensor_id")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let duration_ms: i64 = row.get("duration_ms")?;
    let completed: i64 = row.get("completed")?;

    Ok(ActivationRecord {
        id: row.get("id")?,
        sensor_id: to_sensor_id(sensor_id, "sensor_id").map_err(conversion_error)?,
        start_time: parse_datetime(&start_time, "start_time").map_err(conversion_error)?,
        end_time: parse_optional_datetime(end_time, "end_time").map_err(conversion_error)?,
        duration_ms: to_u64(duration_ms, "duration_ms").map_err(conversion_error)?,
        completed: completed != 0,
        video_path: row.get("video_path")?,
    })
}

fn select_by_id(conn: &Connection, id: i64) -> Result<Option<ActivationRecord>> {
    let sql = format!("SELECT {ACTIVATION_COLUMNS} FROM activations WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_activation)
        .optional()?)
}

fn select_open(conn: &Connection, sensor_id: SensorId) -> Result<Option<ActivationRecord>> {
    let sql = format!(
        "SELECT {ACTIVATION_COLUMNS}
         FROM activations
         WHERE sensor_id = ?1 AND completed = 0
         ORDER BY start_time DESC, id DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![sensor_id], row_to_activation)
        .optional()?)
}

fn write_close(conn: &Connection, closed: &ActivationRecord) -> Result<()> {
    conn.execute(
        "UPDATE activations
         SET end_time = ?1,
             duration_ms = ?2,
             completed = 1
         WHERE id = ?3 AND completed = 0",
        params![
            closed.end_time.as_ref().map(format_datetime),
            to_i64(closed.duration_ms)?,
            closed.id,
        ],
    )
    .with_context(|| format!("failed to close activation {}", closed.id))?;
    Ok(())
}

fn insert_open(
    conn: &Connection,
    sensor_id: SensorId,
    start_time: DateTime<Utc>,
    video_path: Option<String>,
    healed: &mut Vec<ActivationRecord>,
) -> Result<ActivationRecord> {
    if let Some(stale) = select_open(conn, sensor_id)? {
        let stale = heal_record(&stale);
        warn!(
            "sensor {} already had open activation {}; closing it with zero duration",
            sensor_id, stale.id
        );
        write_close(conn, &stale)?;
        healed.push(stale);
    }

    conn.execute(
        "INSERT INTO activations (sensor_id, start_time, end_time, duration_ms, completed, video_path)
         VALUES (?1, ?2, NULL, 0, 0, ?3)",
        params![sensor_id, format_datetime(&start_time), video_path],
    )
    .with_context(|| format!("failed to open activation for sensor {sensor_id}"))?;

    Ok(ActivationRecord {
        id: conn.last_insert_rowid(),
        sensor_id,
        start_time,
        end_time: None,
        duration_ms: 0,
        completed: false,
        video_path,
    })
}

fn select_filtered(conn: &Connection, filter: &ActivationFilter) -> Result<Vec<ActivationRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(sensor_id) = filter.sensor_id {
        clauses.push("sensor_id = ?");
        values.push(Value::Integer(i64::from(sensor_id)));
    }
    if let Some(from) = filter.from {
        clauses.push("start_time >= ?");
        values.push(Value::Text(format_datetime(&from)));
    }
    if let Some(to) = filter.to {
        clauses.push("start_time < ?");
        values.push(Value::Text(format_datetime(&to)));
    }
    if let Some(completed) = filter.completed {
        clauses.push("completed = ?");
        values.push(Value::Integer(i64::from(completed)));
    }

    let mut sql = format!("SELECT {ACTIVATION_COLUMNS} FROM activations");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if filter.newest_first {
        sql.push_str(" ORDER BY start_time DESC, id DESC");
    } else {
        sql.push_str(" ORDER BY start_time ASC, id ASC");
    }
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(to_i64(limit as u64)?));
    }

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values), row_to_activation)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[async_trait]
impl Ledger for Database {
    async fn apply_transition(&self, plan: TransitionPlan) -> Result<AppliedTransition> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut applied = AppliedTransition::default();

            for sensor_id in &plan.closes {
                let Some(open) = select_open(&tx, *sensor_id)? else {
                    continue;
                };
                let closed = close_record(&open, plan.at);
                if is_jitter(&closed, plan.discard_below_ms) {
                    tx.execute("DELETE FROM activations WHERE id = ?1", params![closed.id])?;
                    applied.discarded.push(closed);
                } else {
                    write_close(&tx, &closed)?;
                    applied.closed.push(closed);
                }
            }

            for pending in &plan.opens {
                let record = insert_open(
                    &tx,
                    pending.sensor_id,
                    plan.at,
                    pending.video_path.clone(),
                    &mut applied.healed,
                )?;
                applied.opened.push(record);
            }

            if let Some(participants) = &plan.versus {
                applied.versus = Some(insert_versus(&tx, participants, plan.at)?);
            }

            tx.commit().context("failed to commit sensor transition")?;
            Ok(applied)
        })
        .await
    }

    async fn open_activation(
        &self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        video_path: Option<String>,
    ) -> Result<i64> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut healed = Vec::new();
            let record = insert_open(&tx, sensor_id, start_time, video_path, &mut healed)?;
            tx.commit()?;
            Ok(record.id)
        })
        .await
    }

    async fn close_activation(&self, id: i64, end_time: DateTime<Utc>) -> Result<CloseOutcome> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let outcome = match select_by_id(&tx, id)? {
                None => CloseOutcome::NotFound,
                Some(record) if record.completed => CloseOutcome::AlreadyClosed(record),
                Some(record) => {
                    let closed = close_record(&record, end_time);
                    write_close(&tx, &closed)?;
                    CloseOutcome::Closed(closed)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn find_open_activation(&self, sensor_id: SensorId) -> Result<Option<ActivationRecord>> {
        self.execute(move |conn| select_open(conn, sensor_id)).await
    }

    async fn query_activations(&self, filter: ActivationFilter) -> Result<Vec<ActivationRecord>> {
        self.execute(move |conn| select_filtered(conn, &filter)).await
    }

    async fn record_completed(
        &self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        video_path: Option<String>,
    ) -> Result<ActivationRecord> {
        self.execute(move |conn| {
            let pending = ActivationRecord {
                id: 0,
                sensor_id,
                start_time,
                end_time: None,
                duration_ms: 0,
                completed: false,
                video_path,
            };
            let record = close_record(&pending, end_time);

            conn.execute(
                "INSERT INTO activations (sensor_id, start_time, end_time, duration_ms, completed, video_path)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![
                    sensor_id,
                    format_datetime(&record.start_time),
                    record.end_time.as_ref().map(format_datetime),
                    to_i64(record.duration_ms)?,
                    record.video_path,
                ],
            )
            .with_context(|| format!("failed to record activation for sensor {sensor_id}"))?;

            Ok(ActivationRecord {
                id: conn.last_insert_rowid(),
                ..record
            })
        })
        .await
    }

    async fn query_versus(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<VersusRecord>> {
        self.execute(move |conn| select_versus(conn, from, to)).await
    }

    async fn close_stale_open(&self) -> Result<Vec<ActivationRecord>> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let open = select_filtered(
                &tx,
                &ActivationFilter {
                    completed: Some(false),
                    ..ActivationFilter::default()
                },
            )?;

            let mut healed = Vec::with_capacity(open.len());
            for record in &open {
                let closed = heal_record(record);
                write_close(&tx, &closed)?;
                healed.push(closed);
            }

            tx.commit()?;
            Ok(healed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_support::temp_database;
    use crate::ledger::PendingOpen;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 9, 10, 0, 0).unwrap()
    }

    fn open_plan(at: DateTime<Utc>, sensors: &[SensorId]) -> TransitionPlan {
        TransitionPlan {
            at,
            closes: vec![],
            opens: sensors
                .iter()
                .map(|sensor_id| PendingOpen {
                    sensor_id: *sensor_id,
                    video_path: Some(format!("videos/{sensor_id}.mp4")),
                })
                .collect(),
            versus: None,
            discard_below_ms: None,
        }
    }

    #[tokio::test]
    async fn transition_round_trips_through_sqlite() {
        let (_dir, db) = temp_database();
        let applied = db.apply_transition(open_plan(t0(), &[5, 9])).await.unwrap();
        assert_eq!(applied.opened.len(), 2);

        let close = TransitionPlan {
            at: t0() + Duration::seconds(12),
            closes: vec![5],
            opens: vec![],
            versus: None,
            discard_below_ms: None,
        };
        let applied = db.apply_transition(close).await.unwrap();
        assert_eq!(applied.closed.len(), 1);
        assert_eq!(applied.closed[0].duration_ms, 12_000);

        let stored = db
            .query_activations(ActivationFilter {
                sensor_id: Some(5),
                ..ActivationFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], applied.closed[0]);
        assert_eq!(stored[0].video_path.as_deref(), Some("videos/5.mp4"));
        assert!(db.find_open_activation(9).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_transition_rolls_back() {
        let (_dir, db) = temp_database();
        let mut plan = open_plan(t0(), &[5]);
        plan.versus = Some(vec![7, 7]);

        assert!(db.apply_transition(plan).await.is_err());
        assert!(db.find_open_activation(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn jitter_is_discarded_when_threshold_set() {
        let (_dir, db) = temp_database();
        db.apply_transition(open_plan(t0(), &[5])).await.unwrap();

        let close = TransitionPlan {
            at: t0() + Duration::seconds(2),
            closes: vec![5],
            opens: vec![],
            versus: None,
            discard_below_ms: Some(5_000),
        };
        let applied = db.apply_transition(close).await.unwrap();
        assert_eq!(applied.discarded.len(), 1);
        assert!(applied.closed.is_empty());
        assert!(db
            .query_activations(ActivationFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_open_is_healed_not_rejected() {
        let (_dir, db) = temp_database();
        let first = db.open_activation(5, t0(), None).await.unwrap();
        let second = db
            .open_activation(5, t0() + Duration::seconds(1), None)
            .await
            .unwrap();

        let open = db.find_open_activation(5).await.unwrap().unwrap();
        assert_eq!(open.id, second);

        let outcome = db.close_activation(first, t0() + Duration::hours(1)).await.unwrap();
        assert!(matches!(outcome, CloseOutcome::AlreadyClosed(ref r) if r.duration_ms == 0));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let (_dir, db) = temp_database();
        for offset in 0..4 {
            db.record_completed(
                17,
                t0() + Duration::minutes(offset),
                t0() + Duration::minutes(offset) + Duration::seconds(6),
                None,
            )
            .await
            .unwrap();
        }

        let recent = db.query_activations(ActivationFilter::recent(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].start_time > recent[1].start_time);

        let window = db
            .query_activations(ActivationFilter::in_range(
                t0() + Duration::minutes(1),
                t0() + Duration::minutes(3),
            ))
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        assert!(window.iter().all(|record| record.duration_ms == 6_000));
    }

    #[tokio::test]
    async fn stale_open_records_are_closed_on_recovery() {
        let (_dir, db) = temp_database();
        db.apply_transition(open_plan(t0(), &[5, 9])).await.unwrap();

        let healed = db.close_stale_open().await.unwrap();
        assert_eq!(healed.len(), 2);
        assert!(db.find_open_activation(5).await.unwrap().is_none());
        assert!(db.find_open_activation(9).await.unwrap().is_none());
    }
}
