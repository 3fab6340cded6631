//! Pure computations over ledger rows. Nothing here reads the clock.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};

use crate::db::{ActivationRecord, DailyMetric, HourlyStat, SensorId, VersusRecord};

use super::report::{
    local_date, BreakdownRow, DayTotal, GroupBy, PeakHour, RankingEntry, Report, ReportRange,
    SensorSummary, VersusCount,
};

const HOURS: usize = 24;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of completed activations, 0 for an empty set.
pub fn completion_rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(completed as f64 / total as f64 * 100.0)
    }
}

/// Day-over-day change in percent. A zero baseline yields 0.
pub fn trend_pct(today: u64, yesterday: u64) -> f64 {
    if yesterday == 0 {
        0.0
    } else {
        round2((today as f64 - yesterday as f64) / yesterday as f64 * 100.0)
    }
}

/// Busiest hour; ties go to the earliest. `None` when every bucket is empty.
pub fn peak_hour(buckets: &[u64; HOURS]) -> Option<u32> {
    let mut best: Option<(usize, u64)> = None;
    for (hour, count) in buckets.iter().copied().enumerate() {
        if count == 0 {
            continue;
        }
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((hour, count)),
        }
    }
    best.map(|(hour, _)| hour as u32)
}

fn local_hour(instant: DateTime<Utc>, offset: FixedOffset) -> usize {
    instant.with_timezone(&offset).hour() as usize
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    activations: u64,
    completed: u64,
    completed_duration_ms: u64,
    last_activation: Option<DateTime<Utc>>,
}

impl Tally {
    fn add(&mut self, record: &ActivationRecord) {
        self.activations += 1;
        if record.completed {
            self.completed += 1;
            self.completed_duration_ms = self.completed_duration_ms.saturating_add(record.duration_ms);
        }
        self.last_activation = self.last_activation.max(Some(record.start_time));
    }

    fn average_duration_ms(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            round2(self.completed_duration_ms as f64 / self.completed as f64)
        }
    }

    fn completion_rate(&self) -> f64 {
        completion_rate(self.completed, self.activations)
    }

    fn breakdown_row(&self, key: String) -> BreakdownRow {
        BreakdownRow {
            key,
            activations: self.activations,
            completed: self.completed,
            completion_rate: self.completion_rate(),
            average_duration_ms: self.average_duration_ms(),
        }
    }
}

/// Builds the report for `range`. `records` may also hold rows from the day
/// before the range; they only feed the trend.
pub fn summarize(records: &[ActivationRecord], range: &ReportRange, group_by: GroupBy) -> Report {
    let offset = range.offset;
    let in_range: Vec<&ActivationRecord> = records
        .iter()
        .filter(|record| range.contains(record.start_time))
        .collect();

    let mut overall = Tally::default();
    let mut by_sensor: BTreeMap<SensorId, Tally> = BTreeMap::new();
    let mut by_day: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    let mut by_hour = [Tally::default(); HOURS];
    let mut sensor_day_hours: BTreeMap<(NaiveDate, SensorId), [u64; HOURS]> = BTreeMap::new();

    for record in &in_range {
        let date = local_date(record.start_time, offset);
        let hour = local_hour(record.start_time, offset);

        overall.add(record);
        by_sensor.entry(record.sensor_id).or_default().add(record);
        by_day.entry(date).or_default().add(record);
        by_hour[hour].add(record);
        sensor_day_hours
            .entry((date, record.sensor_id))
            .or_insert([0; HOURS])[hour] += 1;
    }

    let last_day = range.last_day();
    let today = in_range
        .iter()
        .filter(|record| local_date(record.start_time, offset) == last_day)
        .count() as u64;
    let yesterday = last_day
        .pred_opt()
        .map(|day| {
            records
                .iter()
                .filter(|record| record.start_time < range.to)
                .filter(|record| local_date(record.start_time, offset) == day)
                .count() as u64
        })
        .unwrap_or(0);

    let peak_hours = sensor_day_hours
        .iter()
        .filter_map(|((date, sensor_id), buckets)| {
            peak_hour(buckets).map(|hour| PeakHour {
                date: *date,
                sensor_id: *sensor_id,
                hour,
                activations: buckets[hour as usize],
            })
        })
        .collect();

    let breakdown = match group_by {
        GroupBy::Hour => by_hour
            .iter()
            .enumerate()
            .map(|(hour, tally)| tally.breakdown_row(format!("{hour:02}")))
            .collect(),
        GroupBy::Day => by_day
            .iter()
            .map(|(date, tally)| tally.breakdown_row(date.to_string()))
            .collect(),
        GroupBy::Sensor => by_sensor
            .iter()
            .map(|(sensor_id, tally)| tally.breakdown_row(sensor_id.to_string()))
            .collect(),
    };

    Report {
        range: *range,
        group_by,
        total_activations: overall.activations,
        completed_activations: overall.completed,
        open_activations: overall.activations - overall.completed,
        completion_rate: overall.completion_rate(),
        average_duration_ms: overall.average_duration_ms(),
        sensors: by_sensor
            .iter()
            .map(|(sensor_id, tally)| SensorSummary {
                sensor_id: *sensor_id,
                activations: tally.activations,
                completed: tally.completed,
                completion_rate: tally.completion_rate(),
                average_duration_ms: tally.average_duration_ms(),
                last_activation: tally.last_activation,
            })
            .collect(),
        hourly_histogram: by_hour.iter().map(|tally| tally.activations).collect(),
        daily_totals: by_day
            .iter()
            .map(|(date, tally)| DayTotal {
                date: *date,
                activations: tally.activations,
                completed: tally.completed,
            })
            .collect(),
        peak_hours,
        trend_pct: trend_pct(today, yesterday),
        breakdown,
    }
}

/// Sensors by activation count (descending), ties by id.
pub fn ranking(records: &[ActivationRecord], range: &ReportRange) -> Vec<RankingEntry> {
    let mut by_sensor: BTreeMap<SensorId, Tally> = BTreeMap::new();
    for record in records.iter().filter(|r| range.contains(r.start_time)) {
        by_sensor.entry(record.sensor_id).or_default().add(record);
    }

    let mut entries: Vec<(SensorId, Tally)> = by_sensor.into_iter().collect();
    entries.sort_by(|(a_id, a), (b_id, b)| {
        b.activations
            .cmp(&a.activations)
            .then_with(|| a_id.cmp(b_id))
    });

    entries
        .into_iter()
        .enumerate()
        .map(|(index, (sensor_id, tally))| RankingEntry {
            rank: index + 1,
            sensor_id,
            activations: tally.activations,
            last_activation: tally.last_activation,
        })
        .collect()
}

/// Occurrences per distinct participant list, most frequent first.
pub fn versus_counts(records: &[VersusRecord]) -> Vec<VersusCount> {
    let mut grouped: BTreeMap<&[SensorId], VersusCount> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.participants.as_slice())
            .and_modify(|entry| {
                entry.count += 1;
                entry.last_seen = entry.last_seen.max(record.timestamp);
            })
            .or_insert_with(|| VersusCount {
                sensor1_id: record.sensor1_id,
                sensor2_id: record.sensor2_id,
                participants: record.participants.clone(),
                count: 1,
                last_seen: record.timestamp,
            });
    }

    let mut counts: Vec<VersusCount> = grouped.into_values().collect();
    counts.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.participants.cmp(&b.participants))
    });
    counts
}

/// Daily and hourly rows for each of `days`. `records` should include the
/// day before the first one so its trend has a baseline.
pub fn daily_rollup(
    records: &[ActivationRecord],
    days: &[NaiveDate],
    offset: FixedOffset,
    computed_at: DateTime<Utc>,
) -> (Vec<DailyMetric>, Vec<HourlyStat>) {
    let mut totals: BTreeMap<(NaiveDate, SensorId), Tally> = BTreeMap::new();
    let mut hours: BTreeMap<(NaiveDate, SensorId), [Tally; HOURS]> = BTreeMap::new();

    for record in records {
        let date = local_date(record.start_time, offset);
        totals.entry((date, record.sensor_id)).or_default().add(record);
        hours
            .entry((date, record.sensor_id))
            .or_insert([Tally::default(); HOURS])[local_hour(record.start_time, offset)]
            .add(record);
    }

    let mut daily = Vec::new();
    let mut hourly = Vec::new();

    for ((date, sensor_id), tally) in &totals {
        if !days.contains(date) {
            continue;
        }
        let buckets = match hours.get(&(*date, *sensor_id)) {
            Some(buckets) => buckets,
            None => continue,
        };
        let mut counts = [0u64; HOURS];
        for (hour, bucket) in buckets.iter().enumerate() {
            counts[hour] = bucket.activations;
        }
        let peak = peak_hour(&counts);
        let previous = date
            .pred_opt()
            .and_then(|day| totals.get(&(day, *sensor_id)))
            .map_or(0, |previous| previous.activations);

        daily.push(DailyMetric {
            date: *date,
            sensor_id: *sensor_id,
            activation_count: tally.activations,
            completed_count: tally.completed,
            avg_duration_ms: tally.average_duration_ms(),
            peak_hour: peak,
            completion_rate: tally.completion_rate(),
            trend_pct: trend_pct(tally.activations, previous),
            computed_at,
        });

        for (hour, bucket) in buckets.iter().enumerate() {
            if bucket.activations == 0 {
                continue;
            }
            hourly.push(HourlyStat {
                date: *date,
                sensor_id: *sensor_id,
                hour: hour as u32,
                activation_count: bucket.activations,
                completed_count: bucket.completed,
                avg_duration_ms: bucket.average_duration_ms(),
                is_peak: peak == Some(hour as u32),
                computed_at,
            });
        }
    }

    (daily, hourly)
}
