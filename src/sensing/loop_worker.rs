use std::sync::Arc;

use anyhow::Result;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::is_input_error,
    metrics::{MetricsCollector, SnapshotTiming},
    tracker::Tracker,
};

use super::source::SnapshotSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const SAMPLE_TIMEOUT_SECS: u64 = 5;

pub async fn sampling_loop(
    tracker: Arc<Tracker>,
    source: Arc<dyn SnapshotSource>,
    metrics: MetricsCollector,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fut = sample_once(&tracker, source.as_ref(), &metrics);
                match tokio::time::timeout(Duration::from_secs(SAMPLE_TIMEOUT_SECS), fut).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) if is_input_error(&err) => {
                        log_warn!("ignoring invalid sensor snapshot: {err:#}");
                    }
                    Ok(Err(err)) => log_error!("sensor sampling failed: {err:#}"),
                    Err(_) => log_warn!("sensor sampling timeout (> {}s)", SAMPLE_TIMEOUT_SECS),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop shutting down");
                break;
            }
        }
    }
}

async fn sample_once(
    tracker: &Tracker,
    source: &dyn SnapshotSource,
    metrics: &MetricsCollector,
) -> Result<()> {
    let started = Instant::now();
    let reported = source.current_snapshot().await?;
    let result = tracker.process_snapshot(&reported).await?;

    metrics
        .record_snapshot(SnapshotTiming {
            timestamp: Tracker::now(),
            source: "sampler".into(),
            changed: result.changed,
            opened: result.opened.len(),
            closed: result.closed.len(),
            total_ms: started.elapsed().as_millis() as u64,
        })
        .await;
    if result.changed {
        log_info!(
            "snapshot {:?}: {} opened, {} closed",
            result.active_sensors,
            result.opened.len(),
            result.closed.len()
        );
    }
    Ok(())
}
