//! Storage contracts for the activation ledger and the collaborators the
//! tracker reads from.
//!
//! Two backends implement [`Ledger`]: the SQLite [`Database`](crate::db::Database)
//! and the process-local [`MemoryLedger`]. Tracker and aggregation code only
//! ever see the trait.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::helpers::elapsed_ms;
use crate::db::models::{ActivationFilter, ActivationRecord, SensorId, VersusRecord};

pub use memory::{MemoryCollaborators, MemoryLedger};

/// Everything one processed snapshot writes, applied atomically.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub at: DateTime<Utc>,
    pub closes: Vec<SensorId>,
    pub opens: Vec<PendingOpen>,
    /// Canonical (ascending) participants of a versus event, if one fires.
    pub versus: Option<Vec<SensorId>>,
    /// Closed activations shorter than this are deleted instead of kept.
    pub discard_below_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOpen {
    pub sensor_id: SensorId,
    pub video_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTransition {
    pub opened: Vec<ActivationRecord>,
    pub closed: Vec<ActivationRecord>,
    /// Closed but dropped as sensor jitter.
    pub discarded: Vec<ActivationRecord>,
    /// Stale open records force-closed with zero duration.
    pub healed: Vec<ActivationRecord>,
    pub versus: Option<VersusRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(ActivationRecord),
    AlreadyClosed(ActivationRecord),
    NotFound,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Applies closes, opens and the versus insert as one unit. On error
    /// nothing from the plan is visible.
    async fn apply_transition(&self, plan: TransitionPlan) -> Result<AppliedTransition>;

    /// Opens an activation. A stale open record for the same sensor is
    /// closed with zero duration first.
    async fn open_activation(
        &self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        video_path: Option<String>,
    ) -> Result<i64>;

    /// Idempotent: closing a completed record leaves its duration alone.
    async fn close_activation(&self, id: i64, end_time: DateTime<Utc>) -> Result<CloseOutcome>;

    async fn find_open_activation(&self, sensor_id: SensorId) -> Result<Option<ActivationRecord>>;

    async fn query_activations(&self, filter: ActivationFilter) -> Result<Vec<ActivationRecord>>;

    /// Inserts an already finished activation reported by an external source.
    async fn record_completed(
        &self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        video_path: Option<String>,
    ) -> Result<ActivationRecord>;

    async fn query_versus(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<VersusRecord>>;

    /// Closes every open activation with zero duration. Used at startup, when
    /// the previous snapshot that would have closed them is gone.
    async fn close_stale_open(&self) -> Result<Vec<ActivationRecord>>;
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get_config(&self, key: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait VideoDirectory: Send + Sync {
    async fn video_for_sensor(&self, sensor_id: SensorId) -> Result<Option<String>>;
}

pub(crate) fn close_record(open: &ActivationRecord, end_time: DateTime<Utc>) -> ActivationRecord {
    ActivationRecord {
        end_time: Some(end_time),
        duration_ms: elapsed_ms(open.start_time, end_time),
        completed: true,
        ..open.clone()
    }
}

/// Zero-duration close used when a second open record would otherwise exist.
pub(crate) fn heal_record(open: &ActivationRecord) -> ActivationRecord {
    close_record(open, open.start_time)
}

pub(crate) fn is_jitter(closed: &ActivationRecord, discard_below_ms: Option<u64>) -> bool {
    matches!(discard_below_ms, Some(min) if closed.duration_ms < min)
}

pub(crate) fn versus_pair(participants: &[SensorId]) -> Result<(SensorId, SensorId)> {
    if participants.len() < 2 {
        bail!("versus needs at least two sensors, got {}", participants.len());
    }
    if participants.windows(2).any(|pair| pair[0] >= pair[1]) {
        bail!("versus participants must be strictly ascending: {participants:?}");
    }
    Ok((participants[0], participants[1]))
}
