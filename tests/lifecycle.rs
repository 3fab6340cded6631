//! End-to-end run of the kiosk lifecycle against an on-disk database.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

use liftlearn_lib::{
    aggregation::{GroupBy, Summarizer},
    db::{ActivationFilter, Database},
    ledger::Ledger,
    settings::TrackerSettings,
    tracker::{Tracker, VERSUS_MODE_KEY},
};

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 9, 10, 0, 0).unwrap() + Duration::seconds(seconds)
}

fn open_tracker(db: &Database) -> Tracker {
    let ledger = Arc::new(db.clone());
    Tracker::new(
        ledger.clone(),
        ledger.clone(),
        ledger,
        TrackerSettings {
            sensor_pins: Vec::new(),
            ..TrackerSettings::default()
        },
    )
}

#[tokio::test]
async fn snapshots_flow_into_ledger_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("kiosk.sqlite3")).unwrap();
    db.set_config(VERSUS_MODE_KEY, "2").await.unwrap();

    let tracker = open_tracker(&db);
    tracker.recover().await.unwrap();

    tracker.process_snapshot_at(&[], at(0)).await.unwrap();
    let first = tracker.process_snapshot_at(&[5], at(1)).await.unwrap();
    assert_eq!(first.opened.len(), 1);

    let pair = tracker.process_snapshot_at(&[5, 9], at(4)).await.unwrap();
    let versus = pair.versus.expect("pair should record a versus event");
    assert_eq!((versus.sensor1_id, versus.sensor2_id), (5, 9));

    let dropped = tracker.process_snapshot_at(&[9], at(11)).await.unwrap();
    assert_eq!(dropped.closed[0].sensor_id, 5);
    assert_eq!(dropped.closed[0].duration_ms, 10_000);

    let empty = tracker.process_snapshot_at(&[], at(13)).await.unwrap();
    assert_eq!(empty.closed[0].sensor_id, 9);
    assert_eq!(empty.closed[0].duration_ms, 9_000);

    let all = db
        .query_activations(ActivationFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|record| record.completed));

    let summarizer = Summarizer::new(Arc::new(db.clone()), FixedOffset::east_opt(0).unwrap());
    let range = summarizer
        .range(Some("2024-12-09"), Some("2024-12-09"), at(60))
        .unwrap();

    let report = summarizer.summarize(range, GroupBy::Sensor).await.unwrap();
    assert_eq!(report.total_activations, 2);
    assert_eq!(report.completed_activations, 2);
    assert_eq!(report.completion_rate, 100.0);
    assert_eq!(report.hourly_histogram[10], 2);

    let versus = summarizer.versus_counts(range).await.unwrap();
    assert_eq!(versus.len(), 1);
    assert_eq!(versus[0].participants, vec![5, 9]);

    let summary = summarizer.materialize(&db, range, at(60)).await.unwrap();
    assert_eq!(summary.daily_rows, 2);
    let day = NaiveDate::from_ymd_opt(2024, 12, 9).unwrap();
    assert_eq!(db.daily_metrics(day, day).await.unwrap().len(), 2);
}

#[tokio::test]
async fn restart_closes_activations_left_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiosk.sqlite3");

    {
        let db = Database::new(path.clone()).unwrap();
        let tracker = open_tracker(&db);
        tracker.process_snapshot_at(&[27], at(0)).await.unwrap();
    }

    let db = Database::new(path).unwrap();
    let tracker = open_tracker(&db);
    let healed = tracker.recover().await.unwrap();
    assert_eq!(healed.len(), 1);
    assert_eq!(healed[0].sensor_id, 27);
    assert_eq!(healed[0].duration_ms, 0);
    assert!(db.find_open_activation(27).await.unwrap().is_none());

    // Sensor still lifted after the restart opens a fresh record.
    let reopened = tracker.process_snapshot_at(&[27], at(30)).await.unwrap();
    assert_eq!(reopened.opened.len(), 1);
    assert_ne!(reopened.opened[0].id, healed[0].id);
}
