//! Periodic background work: pushing completed activations upstream and
//! rebuilding the materialised rollups.

mod export_push;
mod metrics_refresh;

use std::{future::Future, sync::Arc};

use log::info;
use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{aggregation::Summarizer, db::Database, tracker::Tracker};

pub use export_push::{ExportBatch, ExportPusher, PushOutcome};
pub use metrics_refresh::refresh_recent_days;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

/// Background tasks sharing one cancellation token.
pub struct JobSet {
    cancel_token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl JobSet {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn spawn_export_push(&mut self, pusher: ExportPusher, every: Duration) {
        info!(
            "Pushing completed activations to {} every {}s",
            pusher.endpoint(),
            every.as_secs()
        );
        let pusher = Arc::new(pusher);
        self.spawn_periodic("export push", every, move || {
            let pusher = Arc::clone(&pusher);
            async move { pusher.push_once(Tracker::now()).await.map(|_| ()) }
        });
    }

    pub fn spawn_metrics_refresh(&mut self, summarizer: Summarizer, store: Database, every: Duration) {
        info!("Rebuilding daily metrics every {}s", every.as_secs());
        self.spawn_periodic("metrics refresh", every, move || {
            let summarizer = summarizer.clone();
            let store = store.clone();
            async move {
                refresh_recent_days(&summarizer, &store, Tracker::now())
                    .await
                    .map(|_| ())
            }
        });
    }

    fn spawn_periodic<F, Fut>(&mut self, name: &'static str, every: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let token = self.cancel_token.clone();
        // A run may take at most one period before it is abandoned.
        let timeout = every;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match tokio::time::timeout(timeout, job()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => log_error!("{name} failed: {err:#}"),
                            Err(_) => log_warn!("{name} timed out after {}s", timeout.as_secs()),
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
        self.handles.push((name, handle));
    }

    /// Cancels every job and waits for them to finish their current run.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for (name, handle) in self.handles {
            if let Err(err) = handle.await {
                log_error!("{name} task failed to join: {err}");
            }
        }
    }
}

impl Default for JobSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn periodic_jobs_run_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut jobs = JobSet::new();
        let counter = runs.clone();
        jobs.spawn_periodic("counter", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("failures are logged, not fatal"))
            }
        });
        assert_eq!(jobs.len(), 1);

        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        jobs.shutdown().await;

        let after = runs.load(Ordering::SeqCst);
        assert!(after >= 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after);
    }
}
