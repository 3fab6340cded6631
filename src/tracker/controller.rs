use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use log::{debug, info, warn, Level};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    db::{ActivationRecord, SensorId, VersusRecord},
    error::InputError,
    ledger::{ConfigSource, Ledger, PendingOpen, TransitionPlan, VideoDirectory},
    settings::TrackerSettings,
};

use super::{ActiveSet, Pairing, SnapshotState, TrackerCounters, TrackerStats, VersusMode};

pub const VERSUS_MODE_KEY: &str = "versus_mode";
pub const DEBUG_ENABLED_KEY: &str = "debug_enabled";

/// What one processed snapshot changed. Serialised with snake_case keys,
/// which the kiosk front end reads directly.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TrackerResult {
    pub active_sensors: ActiveSet,
    /// False when the snapshot matched the previous one and nothing was written.
    pub changed: bool,
    pub opened: Vec<ActivationRecord>,
    pub closed: Vec<ActivationRecord>,
    pub discarded: Vec<ActivationRecord>,
    pub healed: Vec<ActivationRecord>,
    pub versus: Option<VersusRecord>,
    pub pairing: Option<Pairing>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RegisterOutcome {
    pub accepted: bool,
    pub reason: Option<String>,
    pub activation: Option<ActivationRecord>,
}

impl RegisterOutcome {
    fn rejected(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_string()),
            activation: None,
        }
    }
}

struct TrackerInner {
    snapshot: SnapshotState,
    settings: TrackerSettings,
}

/// Turns successive active-sensor snapshots into activation records and
/// versus events. Every mutating call runs under one async mutex that is
/// held across the ledger write.
pub struct Tracker {
    ledger: Arc<dyn Ledger>,
    config: Arc<dyn ConfigSource>,
    videos: Arc<dyn VideoDirectory>,
    inner: Mutex<TrackerInner>,
    counters: TrackerCounters,
}

impl Tracker {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        config: Arc<dyn ConfigSource>,
        videos: Arc<dyn VideoDirectory>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            ledger,
            config,
            videos,
            inner: Mutex::new(TrackerInner {
                snapshot: SnapshotState::new(),
                settings,
            }),
            counters: TrackerCounters::default(),
        }
    }

    /// Millisecond precision, matching what the ledger stores.
    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    pub fn stats(&self) -> TrackerStats {
        self.counters.stats()
    }

    pub async fn settings(&self) -> TrackerSettings {
        self.inner.lock().await.settings.clone()
    }

    pub async fn update_settings(&self, settings: TrackerSettings) {
        self.inner.lock().await.settings = settings;
    }

    pub async fn previous_active(&self) -> ActiveSet {
        self.inner.lock().await.snapshot.previous().clone()
    }

    /// When the last snapshot was committed. None before the first one and
    /// after `recover`.
    pub async fn last_snapshot_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.snapshot.committed_at()
    }

    /// Closes activations left open by an earlier run and clears the
    /// in-memory snapshot. Called once before the first snapshot.
    pub async fn recover(&self) -> Result<Vec<ActivationRecord>> {
        let mut inner = self.inner.lock().await;
        let healed = self
            .ledger
            .close_stale_open()
            .await
            .context("failed to close stale open activations")?;
        if !healed.is_empty() {
            warn!(
                "Closed {} activation(s) left open by a previous run",
                healed.len()
            );
            TrackerCounters::bump(&self.counters.healed, healed.len());
        }
        inner.snapshot.reset();
        Ok(healed)
    }

    pub async fn process_snapshot(&self, reported: &[SensorId]) -> Result<TrackerResult> {
        self.process_snapshot_at(reported, Self::now()).await
    }

    pub async fn process_snapshot_at(
        &self,
        reported: &[SensorId],
        now: DateTime<Utc>,
    ) -> Result<TrackerResult> {
        let mut inner = self.inner.lock().await;
        let active = ActiveSet::from_reported(reported, &inner.settings.sensor_pins)?;
        let previous = inner.snapshot.previous().clone();
        self.apply(&mut inner, previous, active, now).await
    }

    /// Diffs `active` against a caller-supplied previous set instead of the
    /// stored one, then stores `active`.
    pub async fn process_transition(
        &self,
        previous: &[SensorId],
        active: &[SensorId],
    ) -> Result<TrackerResult> {
        self.process_transition_at(previous, active, Self::now())
            .await
    }

    pub async fn process_transition_at(
        &self,
        previous: &[SensorId],
        active: &[SensorId],
        now: DateTime<Utc>,
    ) -> Result<TrackerResult> {
        let mut inner = self.inner.lock().await;
        let roster = inner.settings.sensor_pins.clone();
        let previous = ActiveSet::from_reported(previous, &roster)?;
        let active = ActiveSet::from_reported(active, &roster)?;
        self.apply(&mut inner, previous, active, now).await
    }

    /// Records an activation whose duration was measured elsewhere.
    pub async fn register_activation(
        &self,
        sensor_id: SensorId,
        duration_ms: u64,
    ) -> Result<RegisterOutcome> {
        self.register_activation_at(sensor_id, duration_ms, Self::now())
            .await
    }

    pub async fn register_activation_at(
        &self,
        sensor_id: SensorId,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome> {
        let inner = self.inner.lock().await;
        let settings = &inner.settings;

        if !settings.sensor_pins.is_empty() && !settings.sensor_pins.contains(&sensor_id) {
            return Err(InputError::UnknownSensor(sensor_id).into());
        }
        let start_time = i64::try_from(duration_ms)
            .ok()
            .and_then(|ms| now.checked_sub_signed(Duration::milliseconds(ms)))
            .ok_or(InputError::DurationOutOfRange(duration_ms))?;

        if duration_ms < settings.min_activation_ms {
            debug!(
                "Rejected reported activation on sensor {sensor_id}: {duration_ms} ms < {} ms",
                settings.min_activation_ms
            );
            TrackerCounters::bump(&self.counters.reported_rejected, 1);
            return Ok(RegisterOutcome::rejected("duration too short"));
        }

        if self.ledger.find_open_activation(sensor_id).await?.is_some() {
            TrackerCounters::bump(&self.counters.reported_rejected, 1);
            return Ok(RegisterOutcome::rejected("sensor has an open activation"));
        }

        let video_path = self.lookup_video(sensor_id).await;
        let record = self
            .ledger
            .record_completed(sensor_id, start_time, now, video_path)
            .await
            .with_context(|| format!("failed to record reported activation for sensor {sensor_id}"))?;

        info!(
            "Registered activation {} on sensor {} ({} ms)",
            record.id, sensor_id, record.duration_ms
        );
        TrackerCounters::bump(&self.counters.reported_accepted, 1);

        Ok(RegisterOutcome {
            accepted: true,
            reason: None,
            activation: Some(record),
        })
    }

    async fn apply(
        &self,
        inner: &mut TrackerInner,
        previous: ActiveSet,
        active: ActiveSet,
        now: DateTime<Utc>,
    ) -> Result<TrackerResult> {
        if previous == active {
            TrackerCounters::bump(&self.counters.unchanged, 1);
            inner.snapshot.commit(active.clone(), now);
            return Ok(TrackerResult {
                active_sensors: active,
                ..TrackerResult::default()
            });
        }

        let mut opens = Vec::new();
        for sensor_id in active.minus(&previous) {
            opens.push(PendingOpen {
                sensor_id,
                video_path: self.lookup_video(sensor_id).await,
            });
        }

        let mode = self.versus_mode().await?;
        let pairing = mode.pairing(&active);
        let fires = pairing == Pairing::Paired
            && (!inner.settings.versus_on_transition_only
                || mode.pairing(&previous) == Pairing::Idle);

        let plan = TransitionPlan {
            at: now,
            closes: previous.minus(&active),
            opens,
            versus: fires.then(|| active.lowest(usize::from(mode.get()))),
            discard_below_ms: inner
                .settings
                .filter_snapshot_jitter
                .then_some(inner.settings.min_activation_ms),
        };

        let applied = match self.ledger.apply_transition(plan).await {
            Ok(applied) => applied,
            Err(err) => {
                TrackerCounters::bump(&self.counters.failed, 1);
                return Err(err.context("failed to persist sensor transition"));
            }
        };

        inner.snapshot.commit(active.clone(), now);

        let counters = &self.counters;
        TrackerCounters::bump(&counters.snapshots, 1);
        TrackerCounters::bump(&counters.opened, applied.opened.len());
        TrackerCounters::bump(&counters.closed, applied.closed.len());
        TrackerCounters::bump(&counters.discarded, applied.discarded.len());
        TrackerCounters::bump(&counters.healed, applied.healed.len());
        TrackerCounters::bump(&counters.versus, usize::from(applied.versus.is_some()));

        let level = if self.debug_enabled().await {
            Level::Info
        } else {
            Level::Debug
        };
        log::log!(
            level,
            "Sensors {:?} -> {:?}: opened {}, closed {}, discarded {}, versus {}",
            previous,
            active,
            applied.opened.len(),
            applied.closed.len(),
            applied.discarded.len(),
            applied
                .versus
                .as_ref()
                .map(|versus| format!("{:?}", versus.participants))
                .unwrap_or_else(|| "-".into()),
        );

        Ok(TrackerResult {
            active_sensors: active,
            changed: true,
            opened: applied.opened,
            closed: applied.closed,
            discarded: applied.discarded,
            healed: applied.healed,
            versus: applied.versus,
            pairing: Some(pairing),
        })
    }

    async fn lookup_video(&self, sensor_id: SensorId) -> Option<String> {
        match self.videos.video_for_sensor(sensor_id).await {
            Ok(path) => path,
            Err(err) => {
                warn!("Video lookup failed for sensor {sensor_id}, storing none: {err:#}");
                None
            }
        }
    }

    async fn versus_mode(&self) -> Result<VersusMode> {
        let raw = self
            .config
            .get_config(VERSUS_MODE_KEY)
            .await
            .context("failed to read versus mode")?;
        Ok(VersusMode::parse(raw.as_deref()).unwrap_or_else(|| {
            warn!("Invalid or missing versus_mode {raw:?}; falling back to 1");
            VersusMode::default()
        }))
    }

    async fn debug_enabled(&self) -> bool {
        match self.config.get_config(DEBUG_ENABLED_KEY).await {
            Ok(value) => value.is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            Err(err) => {
                warn!("Failed to read debug_enabled: {err:#}");
                false
            }
        }
    }
}
