use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ActiveSet;

pub const MIN_VERSUS_MODE: u8 = 1;
pub const MAX_VERSUS_MODE: u8 = 4;

/// How many simultaneously lifted products make a comparison. Mode 1 never
/// pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VersusMode(u8);

impl Default for VersusMode {
    fn default() -> Self {
        VersusMode(MIN_VERSUS_MODE)
    }
}

impl VersusMode {
    pub fn new(mode: i64) -> Option<Self> {
        (i64::from(MIN_VERSUS_MODE)..=i64::from(MAX_VERSUS_MODE))
            .contains(&mode)
            .then_some(VersusMode(mode as u8))
    }

    /// Parses a stored config value; `None` when missing or invalid.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| value.trim().parse::<i64>().ok())
            .and_then(Self::new)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn pairing(self, set: &ActiveSet) -> Pairing {
        let needed = usize::from(self.0);
        if needed >= 2 && set.len() >= needed {
            Pairing::Paired
        } else {
            Pairing::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Pairing {
    Idle,
    Paired,
}

/// Last committed active set. Lives only in memory; a restart begins empty.
#[derive(Debug, Clone, Default)]
pub struct SnapshotState {
    previous: ActiveSet,
    committed_at: Option<DateTime<Utc>>,
}

impl SnapshotState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> &ActiveSet {
        &self.previous
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    pub fn commit(&mut self, active: ActiveSet, at: DateTime<Utc>) {
        self.previous = active;
        self.committed_at = Some(at);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
pub(crate) struct TrackerCounters {
    pub snapshots: AtomicU64,
    pub unchanged: AtomicU64,
    pub failed: AtomicU64,
    pub opened: AtomicU64,
    pub closed: AtomicU64,
    pub discarded: AtomicU64,
    pub healed: AtomicU64,
    pub versus: AtomicU64,
    pub reported_accepted: AtomicU64,
    pub reported_rejected: AtomicU64,
}

impl TrackerCounters {
    pub fn bump(counter: &AtomicU64, by: usize) {
        counter.fetch_add(by as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TrackerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TrackerStats {
            snapshots_processed: load(&self.snapshots),
            snapshots_unchanged: load(&self.unchanged),
            snapshots_failed: load(&self.failed),
            activations_opened: load(&self.opened),
            activations_closed: load(&self.closed),
            activations_discarded: load(&self.discarded),
            activations_healed: load(&self.healed),
            versus_recorded: load(&self.versus),
            reported_accepted: load(&self.reported_accepted),
            reported_rejected: load(&self.reported_rejected),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub snapshots_processed: u64,
    pub snapshots_unchanged: u64,
    pub snapshots_failed: u64,
    pub activations_opened: u64,
    pub activations_closed: u64,
    pub activations_discarded: u64,
    pub activations_healed: u64,
    pub versus_recorded: u64,
    pub reported_accepted: u64,
    pub reported_rejected: u64,
}
