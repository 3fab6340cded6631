//! SQLite persistence: the activation ledger, versus events, kiosk config,
//! sensor labels/videos and the materialised rollups.

mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

#[cfg(test)]
pub(crate) use connection::test_support;
pub use connection::Database;
pub use models::{
    ActivationFilter, ActivationRecord, DailyMetric, ExportRow, HourlyStat, SensorId, SensorLabel,
    SensorVideo, VersusRecord,
};
