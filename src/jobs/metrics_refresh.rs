use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::{
    aggregation::{MaterializeSummary, ReportRange, Summarizer},
    db::Database,
};

/// Rebuilds yesterday and today, so late closes of activations that began
/// before midnight still land in the right day.
pub async fn refresh_recent_days(
    summarizer: &Summarizer,
    store: &Database,
    now: DateTime<Utc>,
) -> Result<MaterializeSummary> {
    let offset = summarizer.offset();
    let today = now.with_timezone(&offset).date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);
    let range = ReportRange::for_days(yesterday, today, offset)?;
    summarizer.materialize(store, range, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use crate::ledger::Ledger;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use std::sync::Arc;

    #[tokio::test]
    async fn refresh_covers_yesterday_and_today() {
        let (_dir, db) = temp_database();
        let db = Arc::new(db);
        let at = |day, hour| Utc.with_ymd_and_hms(2024, 12, day, hour, 0, 0).unwrap();
        db.record_completed(5, at(8, 23), at(8, 23) + Duration::seconds(6), None)
            .await
            .unwrap();
        db.record_completed(5, at(9, 8), at(9, 8) + Duration::seconds(6), None)
            .await
            .unwrap();

        let summarizer = Summarizer::new(db.clone(), FixedOffset::east_opt(0).unwrap());
        let summary = refresh_recent_days(&summarizer, &db, at(9, 12)).await.unwrap();
        assert_eq!(summary.dates.len(), 2);
        assert_eq!(summary.daily_rows, 2);

        let rows = db
            .daily_metrics(
                NaiveDate::from_ymd_opt(2024, 12, 8).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 9).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].trend_pct, 0.0);
    }
}
