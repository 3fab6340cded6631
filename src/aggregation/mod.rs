//! Read-side analytics over the activation ledger.
//!
//! Every report is computed from a single ledger query, so it reflects one
//! consistent view even while the tracker keeps writing.

pub mod report;
pub mod rollup;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use log::info;

use crate::{
    db::{ActivationFilter, ActivationRecord, Database, ExportRow},
    ledger::Ledger,
};

pub use report::{
    GroupBy, MaterializeSummary, RankingEntry, Report, ReportRange, SensorSummary, VersusCount,
};

#[derive(Clone)]
pub struct Summarizer {
    ledger: Arc<dyn Ledger>,
    offset: FixedOffset,
}

impl Summarizer {
    pub fn new(ledger: Arc<dyn Ledger>, offset: FixedOffset) -> Self {
        Self { ledger, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Builds a range from optional query bounds, defaulting to today.
    pub fn range(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReportRange> {
        Ok(ReportRange::parse(from, to, self.offset, now)?)
    }

    async fn load(&self, range: &ReportRange) -> Result<Vec<ActivationRecord>> {
        self.ledger
            .query_activations(ActivationFilter::in_range(range.from, range.to))
            .await
            .context("failed to read activations for report")
    }

    pub async fn summarize(&self, range: ReportRange, group_by: GroupBy) -> Result<Report> {
        let records = self.load(&range.with_previous_day()).await?;
        Ok(rollup::summarize(&records, &range, group_by))
    }

    pub async fn ranking(&self, range: ReportRange) -> Result<Vec<RankingEntry>> {
        let records = self.load(&range).await?;
        Ok(rollup::ranking(&records, &range))
    }

    pub async fn versus_counts(&self, range: ReportRange) -> Result<Vec<VersusCount>> {
        let records = self
            .ledger
            .query_versus(Some(range.from), Some(range.to))
            .await
            .context("failed to read versus events")?;
        Ok(rollup::versus_counts(&records))
    }

    /// Completed activations as flat rows, oldest first.
    pub async fn export(&self, range: ReportRange) -> Result<Vec<ExportRow>> {
        let filter = ActivationFilter {
            completed: Some(true),
            ..ActivationFilter::in_range(range.from, range.to)
        };
        let records = self
            .ledger
            .query_activations(filter)
            .await
            .context("failed to read activations for export")?;
        Ok(records.iter().filter_map(ExportRow::from_record).collect())
    }

    /// Recomputes daily and hourly rollups for every local day the range
    /// touches and replaces the stored rows for those days.
    pub async fn materialize(
        &self,
        store: &Database,
        range: ReportRange,
        computed_at: DateTime<Utc>,
    ) -> Result<MaterializeSummary> {
        let days = range.days();
        let (Some(first), Some(last)) = (days.first().copied(), days.last().copied()) else {
            anyhow::bail!("range covers no local days");
        };
        let whole_days = ReportRange::for_days(first, last, self.offset)?;
        let records = self.load(&whole_days.with_previous_day()).await?;

        let (daily, hourly) = rollup::daily_rollup(&records, &days, self.offset, computed_at);
        let summary = MaterializeSummary {
            dates: days.clone(),
            daily_rows: daily.len(),
            hourly_rows: hourly.len(),
            computed_at,
        };

        store
            .replace_metrics(days, daily, hourly)
            .await
            .context("failed to store rebuilt metrics")?;

        info!(
            "Rebuilt metrics for {} day(s): {} daily, {} hourly rows",
            summary.dates.len(),
            summary.daily_rows,
            summary.hourly_rows
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use crate::ledger::MemoryLedger;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, day, hour, 0, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[tokio::test]
    async fn summary_over_unchanged_ledger_is_byte_identical() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .record_completed(5, at(9, 10), at(9, 10) + Duration::seconds(7), None)
            .await
            .unwrap();
        ledger.open_activation(9, at(9, 11), None).await.unwrap();

        let summarizer = Summarizer::new(ledger, utc());
        let range = summarizer.range(None, None, at(9, 15)).unwrap();

        let first = summarizer.summarize(range, GroupBy::Day).await.unwrap();
        let second = summarizer.summarize(range, GroupBy::Day).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.total_activations, 2);
    }

    #[tokio::test]
    async fn export_skips_open_activations() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .record_completed(5, at(9, 10), at(9, 10) + Duration::seconds(7), Some("a.mp4".into()))
            .await
            .unwrap();
        ledger.open_activation(9, at(9, 11), None).await.unwrap();

        let summarizer = Summarizer::new(ledger, utc());
        let range = summarizer.range(Some("2024-12-09"), Some("2024-12-09"), at(9, 15)).unwrap();
        let rows = summarizer.export(range).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_ms, 7_000);
        assert_eq!(rows[0].video_path.as_deref(), Some("a.mp4"));
    }

    #[tokio::test]
    async fn materialize_replaces_rows_for_covered_days() {
        let (_dir, db) = temp_database();
        let db = Arc::new(db);
        for (day, hour) in [(8, 9), (9, 9), (9, 9), (9, 17)] {
            db.record_completed(27, at(day, hour), at(day, hour) + Duration::seconds(6), None)
                .await
                .unwrap();
        }

        let summarizer = Summarizer::new(db.clone(), utc());
        let range = summarizer.range(Some("2024-12-09"), None, at(9, 20)).unwrap();
        let summary = summarizer.materialize(&db, range, at(9, 20)).await.unwrap();
        assert_eq!(summary.daily_rows, 1);
        assert_eq!(summary.hourly_rows, 2);

        let monday = NaiveDate::from_ymd_opt(2024, 12, 9).unwrap();
        let stored = db.daily_metrics(monday, monday).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].activation_count, 3);
        assert_eq!(stored[0].trend_pct, 200.0);
        assert_eq!(stored[0].peak_hour, Some(9));
        assert_eq!(stored[0].computed_at, at(9, 20));
    }
}
