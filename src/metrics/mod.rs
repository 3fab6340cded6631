mod types;

pub use types::{SnapshotTiming, SystemInfo, SystemMetrics};

use std::{path::Path, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::tracker::TrackerStats;

const MAX_RECENT_SNAPSHOTS: usize = 20;

/// Process resource usage plus a short history of snapshot timings.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
    started: Instant,
}

struct MetricsState {
    recent_snapshots: Vec<SnapshotTiming>,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_snapshots: Vec::with_capacity(MAX_RECENT_SNAPSHOTS),
                system,
                pid,
            })),
            started: Instant::now(),
        }
    }

    pub async fn record_snapshot(&self, timing: SnapshotTiming) {
        let mut state = self.inner.lock().await;
        state.recent_snapshots.push(timing);
        if state.recent_snapshots.len() > MAX_RECENT_SNAPSHOTS {
            state.recent_snapshots.remove(0);
        }
    }

    pub async fn recent_snapshots(&self) -> Vec<SnapshotTiming> {
        self.inner.lock().await.recent_snapshots.clone()
    }

    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        state.system.refresh_memory();

        let total_memory_mb = state.system.total_memory() as f64 / 1024.0 / 1024.0;
        match state.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
                total_memory_mb,
            },
            None => SystemMetrics {
                total_memory_mb,
                ..SystemMetrics::default()
            },
        }
    }

    pub async fn system_info(
        &self,
        tracker: TrackerStats,
        last_snapshot_at: Option<DateTime<Utc>>,
        database_path: &Path,
    ) -> SystemInfo {
        SystemInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: System::host_name(),
            os: System::long_os_version(),
            host_uptime_secs: System::uptime(),
            process_uptime_secs: self.started.elapsed().as_secs(),
            system: self.sample_system_metrics().await,
            database_path: database_path.display().to_string(),
            tracker,
            last_snapshot_at,
            recent_snapshots: self.recent_snapshots().await,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            started: self.started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn timing(opened: usize) -> SnapshotTiming {
        SnapshotTiming {
            timestamp: Utc::now(),
            source: "api".into(),
            changed: true,
            opened,
            closed: 0,
            total_ms: 1,
        }
    }

    #[tokio::test]
    async fn keeps_only_recent_snapshots() {
        let collector = MetricsCollector::new();
        for opened in 0..(MAX_RECENT_SNAPSHOTS + 5) {
            collector.record_snapshot(timing(opened)).await;
        }
        let recent = collector.recent_snapshots().await;
        assert_eq!(recent.len(), MAX_RECENT_SNAPSHOTS);
        assert_eq!(recent[0].opened, 5);
    }

    #[tokio::test]
    async fn system_info_reports_this_process() {
        let collector = MetricsCollector::new();
        let info = collector
            .system_info(
                TrackerStats::default(),
                None,
                Path::new("/tmp/liftlearn.sqlite3"),
            )
            .await;
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.system.memory_mb > 0.0);
        assert!(info.database_path.ends_with("liftlearn.sqlite3"));
    }
}
