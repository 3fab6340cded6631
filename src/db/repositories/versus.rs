use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};

use crate::db::{
    helpers::{conversion_error, format_datetime, parse_datetime, to_sensor_id},
    models::{SensorId, VersusRecord},
};
use crate::ledger::versus_pair;

fn row_to_versus(row: &Row) -> Result<VersusRecord, rusqlite::Error> {
    let sensor1_id: i64 = row.get("sensor1_id")?;
    let sensor2_id: i64 = row.get("sensor2_id")?;
    let participants: String = row.get("participants")?;
    let timestamp: String = row.get("timestamp")?;

    let sensor1_id = to_sensor_id(sensor1_id, "sensor1_id").map_err(conversion_error)?;
    let sensor2_id = to_sensor_id(sensor2_id, "sensor2_id").map_err(conversion_error)?;

    let participants = serde_json::from_str::<Vec<SensorId>>(&participants)
        .context("failed to parse versus participants")
        .map_err(conversion_error)?;

    Ok(VersusRecord {
        id: row.get("id")?,
        sensor1_id,
        sensor2_id,
        participants,
        timestamp: parse_datetime(&timestamp, "timestamp").map_err(conversion_error)?,
    })
}

pub(crate) fn insert_versus(
    conn: &Connection,
    participants: &[SensorId],
    timestamp: DateTime<Utc>,
) -> Result<VersusRecord> {
    let (sensor1_id, sensor2_id) = versus_pair(participants)?;
    let encoded = serde_json::to_string(participants)?;

    conn.execute(
        "INSERT INTO versus (sensor1_id, sensor2_id, participants, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        params![sensor1_id, sensor2_id, encoded, format_datetime(&timestamp)],
    )
    .with_context(|| format!("failed to record versus {participants:?}"))?;

    Ok(VersusRecord {
        id: conn.last_insert_rowid(),
        sensor1_id,
        sensor2_id,
        participants: participants.to_vec(),
        timestamp,
    })
}

pub(crate) fn select_versus(
    conn: &Connection,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<VersusRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(from) = from {
        clauses.push("timestamp >= ?");
        values.push(Value::Text(format_datetime(&from)));
    }
    if let Some(to) = to {
        clauses.push("timestamp < ?");
        values.push(Value::Text(format_datetime(&to)));
    }

    let mut sql =
        String::from("SELECT id, sensor1_id, sensor2_id, participants, timestamp FROM versus");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY timestamp ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values), row_to_versus)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}
