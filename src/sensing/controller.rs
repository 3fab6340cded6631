use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{metrics::MetricsCollector, tracker::Tracker};

use super::{loop_worker::sampling_loop, source::SnapshotSource};

/// Owns the background task that polls a [`SnapshotSource`] and feeds the
/// tracker.
#[derive(Default)]
pub struct SamplerController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SamplerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        tracker: Arc<Tracker>,
        source: Arc<dyn SnapshotSource>,
        metrics: MetricsCollector,
        interval: Duration,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("sampler already running");
        }
        if interval.is_zero() {
            bail!("sampling interval must be greater than zero");
        }

        info!("Starting sensor sampler every {}ms", interval.as_millis());
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(
            tracker,
            source,
            metrics,
            interval,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sampling loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryCollaborators, MemoryLedger};
    use crate::sensing::JsonFileSource;
    use crate::settings::TrackerSettings;

    #[tokio::test]
    async fn sampler_feeds_tracker_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.json");
        std::fs::write(&path, r#"{"active_sensors": [17, 27]}"#).unwrap();

        let collab = Arc::new(MemoryCollaborators::new());
        let tracker = Arc::new(Tracker::new(
            Arc::new(MemoryLedger::new()),
            collab.clone(),
            collab,
            TrackerSettings::default(),
        ));

        let metrics = MetricsCollector::new();
        let mut sampler = SamplerController::new();
        sampler
            .start(
                tracker.clone(),
                Arc::new(JsonFileSource::new(path)),
                metrics.clone(),
                Duration::from_millis(10),
            )
            .unwrap();
        assert!(sampler.is_running());
        assert!(sampler
            .start(
                tracker.clone(),
                Arc::new(JsonFileSource::new(dir.path().join("other.json"))),
                metrics.clone(),
                Duration::from_millis(10),
            )
            .is_err());

        for _ in 0..200 {
            if !tracker.previous_active().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sampler.stop().await.unwrap();
        assert!(!sampler.is_running());

        assert_eq!(tracker.previous_active().await.to_vec(), vec![17, 27]);
        assert_eq!(tracker.stats().activations_opened, 2);
        assert!(metrics.recent_snapshots().await.iter().any(|timing| timing.changed));
    }
}
