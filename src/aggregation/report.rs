use std::str::FromStr;

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use serde::{Serialize, Serializer};

use crate::{db::SensorId, error::InputError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Hour,
    #[default]
    Day,
    Sensor,
}

impl FromStr for GroupBy {
    type Err = InputError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(GroupBy::Hour),
            "day" => Ok(GroupBy::Day),
            "sensor" => Ok(GroupBy::Sensor),
            _ => Err(InputError::InvalidGroupBy(value.to_string())),
        }
    }
}

fn serialize_instant<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Half-open interval `[from, to)` on activation start times, plus the
/// offset that defines local days and hours inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRange {
    #[serde(serialize_with = "serialize_instant")]
    pub from: DateTime<Utc>,
    #[serde(serialize_with = "serialize_instant")]
    pub to: DateTime<Utc>,
    #[serde(skip)]
    pub offset: FixedOffset,
}

impl ReportRange {
    pub fn new(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<Self, InputError> {
        if to <= from {
            return Err(InputError::EmptyRange);
        }
        Ok(Self { from, to, offset })
    }

    /// Whole local days `first..=last`.
    pub fn for_days(
        first: NaiveDate,
        last: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Self, InputError> {
        let to = last.succ_opt().ok_or(InputError::EmptyRange)?;
        Self::new(
            checked_midnight(first, offset)?,
            checked_midnight(to, offset)?,
            offset,
        )
    }

    /// Parses query bounds. Each bound is an RFC 3339 instant or a
    /// `YYYY-MM-DD` local date; a date `to` includes that whole day. Missing
    /// bounds default to the local day containing `now`.
    pub fn parse(
        from: Option<&str>,
        to: Option<&str>,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<Self, InputError> {
        let today = local_date(now, offset);

        let from = match from.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => parse_bound(raw, offset, false)?,
            None => checked_midnight(today, offset)?,
        };
        let to = match to.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => parse_bound(raw, offset, true)?,
            None => match today.succ_opt() {
                Some(tomorrow) => checked_midnight(tomorrow, offset)?,
                None => return Err(InputError::EmptyRange),
            },
        };

        Self::new(from, to, offset)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant < self.to
    }

    pub fn first_day(&self) -> NaiveDate {
        local_date(self.from, self.offset)
    }

    pub fn last_day(&self) -> NaiveDate {
        local_date(self.to - Duration::milliseconds(1), self.offset)
    }

    /// Every local day touched by the range, ascending.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.first_day()
            .iter_days()
            .take_while(|day| *day <= self.last_day())
            .collect()
    }

    /// Same end, but starting at the local midnight of the day before the
    /// first day, so day-over-day comparisons have their baseline. Keeps the
    /// original start when that day is not representable.
    pub fn with_previous_day(&self) -> Self {
        let first = self.first_day();
        let from = first
            .pred_opt()
            .and_then(|day| local_midnight(day, self.offset))
            .unwrap_or(self.from);
        Self {
            from: from.min(self.from),
            ..*self
        }
    }
}

fn parse_bound(raw: &str, offset: FixedOffset, is_end: bool) -> Result<DateTime<Utc>, InputError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| InputError::InvalidTimestamp(raw.to_string()))?;
    let date = if is_end {
        date.succ_opt()
            .ok_or_else(|| InputError::InvalidTimestamp(raw.to_string()))?
    } else {
        date
    };
    local_midnight(date, offset).ok_or_else(|| InputError::InvalidTimestamp(raw.to_string()))
}

fn checked_midnight(date: NaiveDate, offset: FixedOffset) -> Result<DateTime<Utc>, InputError> {
    local_midnight(date, offset).ok_or_else(|| InputError::InvalidTimestamp(date.to_string()))
}

/// `None` when the instant falls outside the representable range.
pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let local = date.and_time(NaiveTime::MIN);
    let utc = local.checked_sub_signed(Duration::seconds(i64::from(offset.local_minus_utc())))?;
    Some(Utc.from_utc_datetime(&utc))
}

pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorSummary {
    pub sensor_id: SensorId,
    pub activations: u64,
    pub completed: u64,
    pub completion_rate: f64,
    pub average_duration_ms: f64,
    pub last_activation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayTotal {
    pub date: NaiveDate,
    pub activations: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeakHour {
    pub date: NaiveDate,
    pub sensor_id: SensorId,
    pub hour: u32,
    pub activations: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownRow {
    pub key: String,
    pub activations: u64,
    pub completed: u64,
    pub completion_rate: f64,
    pub average_duration_ms: f64,
}

/// Everything derived from one range of the ledger. Contains no wall-clock
/// values, so the same ledger always serialises to the same bytes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub range: ReportRange,
    pub group_by: GroupBy,
    pub total_activations: u64,
    pub completed_activations: u64,
    pub open_activations: u64,
    pub completion_rate: f64,
    pub average_duration_ms: f64,
    pub sensors: Vec<SensorSummary>,
    /// Activations per local hour of day, index 0..24.
    pub hourly_histogram: Vec<u64>,
    pub daily_totals: Vec<DayTotal>,
    pub peak_hours: Vec<PeakHour>,
    /// Last local day of the range against the day before.
    pub trend_pct: f64,
    pub breakdown: Vec<BreakdownRow>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub rank: usize,
    pub sensor_id: SensorId,
    pub activations: u64,
    pub last_activation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersusCount {
    pub sensor1_id: SensorId,
    pub sensor2_id: SensorId,
    pub participants: Vec<SensorId>,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeSummary {
    pub dates: Vec<NaiveDate>,
    pub daily_rows: usize,
    pub hourly_rows: usize,
    pub computed_at: DateTime<Utc>,
}
