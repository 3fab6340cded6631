//! Process-local ledger and collaborator tables. Nothing here survives a
//! restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;

use super::{
    close_record, heal_record, is_jitter, versus_pair, AppliedTransition, CloseOutcome,
    ConfigSource, Ledger, TransitionPlan, VideoDirectory,
};
use crate::db::models::{ActivationFilter, ActivationRecord, SensorId, VersusRecord};

#[derive(Default)]
struct Tables {
    activations: Vec<ActivationRecord>,
    versus: Vec<VersusRecord>,
    next_activation_id: i64,
    next_versus_id: i64,
}

impl Tables {
    fn open_index(&self, sensor_id: SensorId) -> Option<usize> {
        self.activations
            .iter()
            .enumerate()
            .filter(|(_, record)| record.sensor_id == sensor_id && record.is_open())
            .max_by_key(|(_, record)| (record.start_time, record.id))
            .map(|(index, _)| index)
    }

    fn insert_open(
        &mut self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        video_path: Option<String>,
        healed: &mut Vec<ActivationRecord>,
    ) -> ActivationRecord {
        if let Some(index) = self.open_index(sensor_id) {
            let stale = heal_record(&self.activations[index]);
            warn!(
                "sensor {} already had open activation {}; closing it with zero duration",
                sensor_id, stale.id
            );
            self.activations[index] = stale.clone();
            healed.push(stale);
        }

        self.next_activation_id += 1;
        let record = ActivationRecord {
            id: self.next_activation_id,
            sensor_id,
            start_time,
            end_time: None,
            duration_ms: 0,
            completed: false,
            video_path,
        };
        self.activations.push(record.clone());
        record
    }

    fn insert_versus(&mut self, participants: Vec<SensorId>, timestamp: DateTime<Utc>) -> Result<VersusRecord> {
        let (sensor1_id, sensor2_id) = versus_pair(&participants)?;
        self.next_versus_id += 1;
        let record = VersusRecord {
            id: self.next_versus_id,
            sensor1_id,
            sensor2_id,
            participants,
            timestamp,
        };
        self.versus.push(record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory ledger lock poisoned"))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn apply_transition(&self, plan: TransitionPlan) -> Result<AppliedTransition> {
        // The only failure mode is a bad versus list; check it before mutating.
        if let Some(participants) = &plan.versus {
            versus_pair(participants)?;
        }

        let mut tables = self.tables()?;
        let mut applied = AppliedTransition::default();

        for sensor_id in &plan.closes {
            let Some(index) = tables.open_index(*sensor_id) else {
                continue;
            };
            let closed = close_record(&tables.activations[index], plan.at);
            if is_jitter(&closed, plan.discard_below_ms) {
                tables.activations.remove(index);
                applied.discarded.push(closed);
            } else {
                tables.activations[index] = closed.clone();
                applied.closed.push(closed);
            }
        }

        for pending in &plan.opens {
            let record = tables.insert_open(
                pending.sensor_id,
                plan.at,
                pending.video_path.clone(),
                &mut applied.healed,
            );
            applied.opened.push(record);
        }

        if let Some(participants) = plan.versus {
            applied.versus = Some(tables.insert_versus(participants, plan.at)?);
        }

        Ok(applied)
    }

    async fn open_activation(
        &self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        video_path: Option<String>,
    ) -> Result<i64> {
        let mut tables = self.tables()?;
        let mut healed = Vec::new();
        Ok(tables
            .insert_open(sensor_id, start_time, video_path, &mut healed)
            .id)
    }

    async fn close_activation(&self, id: i64, end_time: DateTime<Utc>) -> Result<CloseOutcome> {
        let mut tables = self.tables()?;
        let Some(record) = tables.activations.iter_mut().find(|record| record.id == id) else {
            return Ok(CloseOutcome::NotFound);
        };
        if record.completed {
            return Ok(CloseOutcome::AlreadyClosed(record.clone()));
        }
        *record = close_record(record, end_time);
        Ok(CloseOutcome::Closed(record.clone()))
    }

    async fn find_open_activation(&self, sensor_id: SensorId) -> Result<Option<ActivationRecord>> {
        let tables = self.tables()?;
        Ok(tables
            .open_index(sensor_id)
            .map(|index| tables.activations[index].clone()))
    }

    async fn query_activations(&self, filter: ActivationFilter) -> Result<Vec<ActivationRecord>> {
        let tables = self.tables()?;
        let mut records: Vec<ActivationRecord> = tables
            .activations
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        records.sort_by_key(|record| (record.start_time, record.id));
        if filter.newest_first {
            records.reverse();
        }
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn record_completed(
        &self,
        sensor_id: SensorId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        video_path: Option<String>,
    ) -> Result<ActivationRecord> {
        let mut tables = self.tables()?;
        tables.next_activation_id += 1;
        let open = ActivationRecord {
            id: tables.next_activation_id,
            sensor_id,
            start_time,
            end_time: None,
            duration_ms: 0,
            completed: false,
            video_path,
        };
        let record = close_record(&open, end_time);
        tables.activations.push(record.clone());
        Ok(record)
    }

    async fn query_versus(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<VersusRecord>> {
        let tables = self.tables()?;
        let mut records: Vec<VersusRecord> = tables
            .versus
            .iter()
            .filter(|record| from.map_or(true, |from| record.timestamp >= from))
            .filter(|record| to.map_or(true, |to| record.timestamp < to))
            .cloned()
            .collect();
        records.sort_by_key(|record| (record.timestamp, record.id));
        Ok(records)
    }

    async fn close_stale_open(&self) -> Result<Vec<ActivationRecord>> {
        let mut tables = self.tables()?;
        let mut healed = Vec::new();
        for record in tables.activations.iter_mut().filter(|record| record.is_open()) {
            *record = heal_record(record);
            healed.push(record.clone());
        }
        Ok(healed)
    }
}

/// In-memory config and video assignment tables.
#[derive(Default)]
pub struct MemoryCollaborators {
    config: RwLock<HashMap<String, String>>,
    videos: RwLock<HashMap<SensorId, String>>,
}

impl MemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&self, key: &str, value: &str) {
        if let Ok(mut config) = self.config.write() {
            config.insert(key.to_string(), value.to_string());
        }
    }

    pub fn assign_video(&self, sensor_id: SensorId, video_path: &str) {
        if let Ok(mut videos) = self.videos.write() {
            videos.insert(sensor_id, video_path.to_string());
        }
    }
}

#[async_trait]
impl ConfigSource for MemoryCollaborators {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let config = self
            .config
            .read()
            .map_err(|_| anyhow!("config table lock poisoned"))?;
        Ok(config.get(key).cloned())
    }
}

#[async_trait]
impl VideoDirectory for MemoryCollaborators {
    async fn video_for_sensor(&self, sensor_id: SensorId) -> Result<Option<String>> {
        let videos = self
            .videos
            .read()
            .map_err(|_| anyhow!("video table lock poisoned"))?;
        Ok(videos.get(&sensor_id).cloned())
    }
}
