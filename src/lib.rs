pub mod aggregation;
pub mod api;
pub mod db;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod sensing;
pub mod settings;
pub mod tracker;
mod utils;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use aggregation::Summarizer;
use api::{create_router, AppState};
use db::Database;
use jobs::{ExportPusher, JobSet};
use metrics::MetricsCollector;
use sensing::{JsonFileSource, SamplerController, SnapshotSource};
use settings::SettingsStore;
use tracker::Tracker;

#[derive(Parser, Debug, Clone)]
#[command(name = "liftlearn")]
#[command(about = "Shelf sensor activation tracker and analytics for lift-and-learn kiosks")]
pub struct Args {
    /// SQLite database file
    #[arg(long, env = "LIFTLEARN_DB", default_value = "data/liftlearn.sqlite3")]
    pub db: PathBuf,

    /// JSON settings file, created with defaults on first update
    #[arg(long, env = "LIFTLEARN_SETTINGS", default_value = "data/settings.json")]
    pub settings: PathBuf,

    /// Address the HTTP API listens on
    #[arg(long, env = "LIFTLEARN_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    run_with(Args::parse()).await
}

pub async fn run_with(args: Args) -> Result<()> {
    info!("liftlearn starting up...");

    let database = Database::new(args.db.clone())?;
    let settings = Arc::new(SettingsStore::new(args.settings.clone())?);
    let snapshot = settings.snapshot()?;
    let offset = snapshot.local_offset()?;

    let ledger = Arc::new(database.clone());
    let tracker = Arc::new(Tracker::new(
        ledger.clone(),
        ledger.clone(),
        ledger.clone(),
        snapshot.tracker.clone(),
    ));

    // Close activations that were open when the process last stopped.
    tracker
        .recover()
        .await
        .context("failed to recover open activations")?;

    let summarizer = Summarizer::new(ledger, offset);
    let metrics = MetricsCollector::new();

    let source: Option<Arc<dyn SnapshotSource>> = snapshot
        .sampling
        .snapshot_file
        .clone()
        .map(|path| Arc::new(JsonFileSource::new(path)) as Arc<dyn SnapshotSource>);

    let mut sampler = SamplerController::new();
    if let Some(source) = &source {
        sampler.start(
            Arc::clone(&tracker),
            Arc::clone(source),
            metrics.clone(),
            Duration::from_millis(snapshot.sampling.interval_ms),
        )?;
    }

    let mut jobs = JobSet::new();
    if let Some(pusher) = ExportPusher::from_settings(&snapshot.reporting, summarizer.clone())? {
        jobs.spawn_export_push(
            pusher,
            Duration::from_secs(snapshot.reporting.interval_secs.max(1)),
        );
    }
    if snapshot.metrics.refresh_secs > 0 {
        jobs.spawn_metrics_refresh(
            summarizer.clone(),
            database.clone(),
            Duration::from_secs(snapshot.metrics.refresh_secs),
        );
    }

    let state = AppState {
        tracker,
        summarizer,
        db: database,
        settings,
        metrics,
        source,
    };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!("Listening on {}", args.bind);

    let served = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    info!("Shutting down background work");
    if let Err(err) = sampler.stop().await {
        warn!("Sampler did not stop cleanly: {err:#}");
    }
    jobs.shutdown().await;

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
