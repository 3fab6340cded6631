use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_datetime, parse_datetime, to_i64, to_sensor_id, to_u64},
    models::{DailyMetric, HourlyStat},
};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("invalid metric date '{value}'"))
}

fn row_to_daily(row: &Row) -> Result<DailyMetric, rusqlite::Error> {
    let date: String = row.get("date")?;
    let sensor_id: i64 = row.get("sensor_id")?;
    let activation_count: i64 = row.get("activation_count")?;
    let completed_count: i64 = row.get("completed_count")?;
    let peak_hour: Option<i64> = row.get("peak_hour")?;
    let computed_at: String = row.get("computed_at")?;

    Ok(DailyMetric {
        date: parse_date(&date).map_err(conversion_error)?,
        sensor_id: to_sensor_id(sensor_id, "sensor_id").map_err(conversion_error)?,
        activation_count: to_u64(activation_count, "activation_count")
            .map_err(conversion_error)?,
        completed_count: to_u64(completed_count, "completed_count").map_err(conversion_error)?,
        avg_duration_ms: row.get("avg_duration_ms")?,
        peak_hour: peak_hour.map(|hour| hour as u32),
        completion_rate: row.get("completion_rate")?,
        trend_pct: row.get("trend_pct")?,
        computed_at: parse_datetime(&computed_at, "computed_at").map_err(conversion_error)?,
    })
}

fn row_to_hourly(row: &Row) -> Result<HourlyStat, rusqlite::Error> {
    let date: String = row.get("date")?;
    let sensor_id: i64 = row.get("sensor_id")?;
    let hour: i64 = row.get("hour")?;
    let activation_count: i64 = row.get("activation_count")?;
    let completed_count: i64 = row.get("completed_count")?;
    let is_peak: i64 = row.get("is_peak")?;
    let computed_at: String = row.get("computed_at")?;

    Ok(HourlyStat {
        date: parse_date(&date).map_err(conversion_error)?,
        sensor_id: to_sensor_id(sensor_id, "sensor_id").map_err(conversion_error)?,
        hour: hour as u32,
        activation_count: to_u64(activation_count, "activation_count")
            .map_err(conversion_error)?,
        completed_count: to_u64(completed_count, "completed_count").map_err(conversion_error)?,
        avg_duration_ms: row.get("avg_duration_ms")?,
        is_peak: is_peak != 0,
        computed_at: parse_datetime(&computed_at, "computed_at").map_err(conversion_error)?,
    })
}

impl Database {
    /// Replaces every daily and hourly row for `dates` in one transaction.
    /// Dates with no rows in `daily`/`hourly` end up empty.
    pub async fn replace_metrics(
        &self,
        dates: Vec<NaiveDate>,
        daily: Vec<DailyMetric>,
        hourly: Vec<HourlyStat>,
    ) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            for date in &dates {
                let key = date.format(DATE_FORMAT).to_string();
                tx.execute("DELETE FROM daily_metrics WHERE date = ?1", params![key])?;
                tx.execute("DELETE FROM hourly_stats WHERE date = ?1", params![key])?;
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO daily_metrics (
                        date, sensor_id, activation_count, completed_count, avg_duration_ms,
                        peak_hour, completion_rate, trend_pct, computed_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for metric in &daily {
                    stmt.execute(params![
                        metric.date.format(DATE_FORMAT).to_string(),
                        metric.sensor_id,
                        to_i64(metric.activation_count)?,
                        to_i64(metric.completed_count)?,
                        metric.avg_duration_ms,
                        metric.peak_hour,
                        metric.completion_rate,
                        metric.trend_pct,
                        format_datetime(&metric.computed_at),
                    ])
                    .with_context(|| {
                        format!(
                            "failed to store daily metric for sensor {} on {}",
                            metric.sensor_id, metric.date
                        )
                    })?;
                }
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO hourly_stats (
                        date, sensor_id, hour, activation_count, completed_count,
                        avg_duration_ms, is_peak, computed_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for stat in &hourly {
                    stmt.execute(params![
                        stat.date.format(DATE_FORMAT).to_string(),
                        stat.sensor_id,
                        stat.hour,
                        to_i64(stat.activation_count)?,
                        to_i64(stat.completed_count)?,
                        stat.avg_duration_ms,
                        stat.is_peak,
                        format_datetime(&stat.computed_at),
                    ])?;
                }
            }

            tx.commit().context("failed to commit metrics rebuild")?;
            Ok(())
        })
        .await
    }

    /// Daily rows with `from <= date <= to`, ordered by date then sensor.
    pub async fn daily_metrics(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyMetric>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT date, sensor_id, activation_count, completed_count, avg_duration_ms,
                        peak_hour, completion_rate, trend_pct, computed_at
                 FROM daily_metrics
                 WHERE date >= ?1 AND date <= ?2
                 ORDER BY date ASC, sensor_id ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        from.format(DATE_FORMAT).to_string(),
                        to.format(DATE_FORMAT).to_string()
                    ],
                    row_to_daily,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn hourly_stats(&self, date: NaiveDate) -> Result<Vec<HourlyStat>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT date, sensor_id, hour, activation_count, completed_count,
                        avg_duration_ms, is_peak, computed_at
                 FROM hourly_stats
                 WHERE date = ?1
                 ORDER BY sensor_id ASC, hour ASC",
            )?;
            let rows = stmt
                .query_map(params![date.format(DATE_FORMAT).to_string()], row_to_hourly)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_support::temp_database;
    use chrono::{TimeZone, Utc};

    fn daily(date: NaiveDate, sensor_id: u32, count: u64) -> DailyMetric {
        DailyMetric {
            date,
            sensor_id,
            activation_count: count,
            completed_count: count,
            avg_duration_ms: 6_000.0,
            peak_hour: Some(10),
            completion_rate: 1.0,
            trend_pct: 0.0,
            computed_at: Utc.with_ymd_and_hms(2024, 12, 10, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn rebuild_replaces_only_covered_dates() {
        let (_dir, db) = temp_database();
        let monday = NaiveDate::from_ymd_opt(2024, 12, 9).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 12, 10).unwrap();

        db.replace_metrics(
            vec![monday, tuesday],
            vec![daily(monday, 17, 3), daily(monday, 27, 1), daily(tuesday, 17, 2)],
            vec![HourlyStat {
                date: monday,
                sensor_id: 17,
                hour: 10,
                activation_count: 3,
                completed_count: 3,
                avg_duration_ms: 6_000.0,
                is_peak: true,
                computed_at: Utc.with_ymd_and_hms(2024, 12, 10, 0, 0, 0).unwrap(),
            }],
        )
        .await
        .unwrap();

        db.replace_metrics(vec![tuesday], vec![daily(tuesday, 17, 5)], vec![])
            .await
            .unwrap();

        let rows = db.daily_metrics(monday, tuesday).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], daily(monday, 17, 3));
        assert_eq!(rows[2].activation_count, 5);

        let hours = db.hourly_stats(monday).await.unwrap();
        assert_eq!(hours.len(), 1);
        assert!(hours[0].is_peak);
    }
}
