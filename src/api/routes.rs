use std::{collections::BTreeMap, sync::Arc, time::Instant};

use axum::{
    extract::State,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    aggregation::{
        GroupBy, MaterializeSummary, RankingEntry, Report, ReportRange, Summarizer, VersusCount,
    },
    db::{
        ActivationFilter, ActivationRecord, DailyMetric, Database, ExportRow, HourlyStat,
        SensorId, SensorLabel, SensorVideo,
    },
    error::InputError,
    metrics::{MetricsCollector, SnapshotTiming, SystemInfo},
    sensing::SnapshotSource,
    settings::{KioskSettings, SettingsStore, TrackerSettings},
    tracker::{
        RegisterOutcome, Tracker, TrackerResult, VersusMode, DEBUG_ENABLED_KEY, VERSUS_MODE_KEY,
    },
};

use super::{
    error::ApiError,
    extract::{ApiJson, ApiPath, ApiQuery},
    logging::request_logging,
};

const DEFAULT_RECENT_LIMIT: usize = 50;
const MAX_RECENT_LIMIT: usize = 500;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub summarizer: Summarizer,
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub metrics: MetricsCollector,
    /// Pull source for `GET /api/sensor_status`. None when only pushed
    /// snapshots are accepted.
    pub source: Option<Arc<dyn SnapshotSource>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sensor_status", post(push_status).get(pull_status))
        .route("/api/register_activation", post(register_activation))
        .route("/api/activations/recent", get(recent_activations))
        .route("/api/summary", get(summary))
        .route("/api/ranking", get(ranking))
        .route("/api/versus", get(versus))
        .route("/api/export", get(export))
        .route("/api/metrics/daily", get(daily_metrics))
        .route("/api/metrics/hourly", get(hourly_stats))
        .route("/api/metrics/rebuild", post(rebuild_metrics))
        .route("/api/config", get(config))
        .route("/api/config/versus_mode", post(set_versus_mode))
        .route("/api/config/debug", post(set_debug))
        .route("/api/settings/tracker", put(update_tracker_settings))
        .route("/api/sensors", get(sensors))
        .route("/api/sensors/:id/video", put(assign_video))
        .route("/api/sensors/:id/label", put(rename_sensor))
        .route("/api/system_info", get(system_info))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct SensorStatusRequest {
    pub active_sensors: Vec<SensorId>,
    #[serde(default)]
    pub previous_sensors: Option<Vec<SensorId>>,
}

#[derive(Debug, Serialize)]
pub struct SensorStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: TrackerResult,
}

async fn push_status(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SensorStatusRequest>,
) -> ApiResult<SensorStatusResponse> {
    let started = Instant::now();
    let result = match &body.previous_sensors {
        Some(previous) => {
            state
                .tracker
                .process_transition(previous, &body.active_sensors)
                .await?
        }
        None => state.tracker.process_snapshot(&body.active_sensors).await?,
    };
    record_timing(&state.metrics, "api", &result, started).await;

    Ok(Json(SensorStatusResponse {
        success: true,
        result,
    }))
}

async fn pull_status(State(state): State<AppState>) -> ApiResult<SensorStatusResponse> {
    let Some(source) = state.source.as_ref() else {
        return Err(ApiError::Unavailable(
            "no snapshot source configured".into(),
        ));
    };

    let started = Instant::now();
    let reported = source.current_snapshot().await?;
    let result = state.tracker.process_snapshot(&reported).await?;
    record_timing(&state.metrics, "pull", &result, started).await;

    Ok(Json(SensorStatusResponse {
        success: true,
        result,
    }))
}

async fn record_timing(
    metrics: &MetricsCollector,
    source: &str,
    result: &TrackerResult,
    started: Instant,
) {
    metrics
        .record_snapshot(SnapshotTiming {
            timestamp: Tracker::now(),
            source: source.to_string(),
            changed: result.changed,
            opened: result.opened.len(),
            closed: result.closed.len(),
            total_ms: started.elapsed().as_millis() as u64,
        })
        .await;
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub sensor_id: SensorId,
    /// Milliseconds the product was lifted.
    pub duration: u64,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: RegisterOutcome,
}

async fn register_activation(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> ApiResult<RegisterResponse> {
    let outcome = state
        .tracker
        .register_activation(body.sensor_id, body.duration)
        .await?;
    Ok(Json(RegisterResponse {
        success: outcome.accepted,
        outcome,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

async fn recent_activations(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RecentQuery>,
) -> ApiResult<Vec<ActivationRecord>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    let records = state
        .tracker
        .ledger()
        .query_activations(ActivationFilter::recent(limit))
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub group_by: Option<String>,
}

impl RangeQuery {
    fn range(&self, summarizer: &Summarizer) -> anyhow::Result<ReportRange> {
        summarizer.range(self.from.as_deref(), self.to.as_deref(), Tracker::now())
    }
}

async fn summary(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<Report> {
    let range = query.range(&state.summarizer)?;
    let group_by = match query.group_by.as_deref() {
        Some(raw) => raw.parse::<GroupBy>()?,
        None => GroupBy::default(),
    };
    Ok(Json(state.summarizer.summarize(range, group_by).await?))
}

async fn ranking(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<Vec<RankingEntry>> {
    let range = query.range(&state.summarizer)?;
    Ok(Json(state.summarizer.ranking(range).await?))
}

async fn versus(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<Vec<VersusCount>> {
    let range = query.range(&state.summarizer)?;
    Ok(Json(state.summarizer.versus_counts(range).await?))
}

async fn export(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<Vec<ExportRow>> {
    let range = query.range(&state.summarizer)?;
    Ok(Json(state.summarizer.export(range).await?))
}

async fn daily_metrics(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<Vec<DailyMetric>> {
    let range = query.range(&state.summarizer)?;
    let rows = state
        .db
        .daily_metrics(range.first_day(), range.last_day())
        .await?;
    Ok(Json(rows))
}

/// Stored hourly rows for the first local day of the range.
async fn hourly_stats(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<Vec<HourlyStat>> {
    let range = query.range(&state.summarizer)?;
    Ok(Json(state.db.hourly_stats(range.first_day()).await?))
}

async fn rebuild_metrics(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<MaterializeSummary> {
    let range = query.range(&state.summarizer)?;
    let summary = state
        .summarizer
        .materialize(&state.db, range, Tracker::now())
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub system_config: BTreeMap<String, String>,
    pub settings: KioskSettings,
}

async fn config(State(state): State<AppState>) -> ApiResult<ConfigResponse> {
    Ok(Json(ConfigResponse {
        system_config: state.db.all_config().await?,
        settings: state.settings.snapshot()?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VersusModeRequest {
    pub mode: i64,
}

async fn set_versus_mode(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<VersusModeRequest>,
) -> ApiResult<Value> {
    let mode = VersusMode::new(body.mode).ok_or(InputError::VersusModeOutOfRange(body.mode))?;
    state
        .db
        .set_config(VERSUS_MODE_KEY, &mode.get().to_string())
        .await?;
    Ok(Json(json!({ "success": true, "versus_mode": mode.get() })))
}

#[derive(Debug, Deserialize)]
pub struct DebugRequest {
    pub enabled: bool,
}

async fn set_debug(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<DebugRequest>,
) -> ApiResult<Value> {
    let value = if body.enabled { "true" } else { "false" };
    state.db.set_config(DEBUG_ENABLED_KEY, value).await?;
    Ok(Json(json!({ "success": true, "debug_enabled": body.enabled })))
}

async fn update_tracker_settings(
    State(state): State<AppState>,
    ApiJson(settings): ApiJson<TrackerSettings>,
) -> ApiResult<TrackerSettings> {
    state.settings.update_tracker(settings.clone())?;
    state.tracker.update_settings(settings.clone()).await;
    Ok(Json(settings))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEntry {
    #[serde(flatten)]
    pub label: SensorLabel,
    pub name: String,
    pub video: Option<SensorVideo>,
}

async fn sensors(State(state): State<AppState>) -> ApiResult<Vec<SensorEntry>> {
    let labels = state.db.list_labels().await?;
    let mut videos: BTreeMap<SensorId, SensorVideo> = state
        .db
        .list_videos()
        .await?
        .into_iter()
        .map(|video| (video.sensor_id, video))
        .collect();

    let entries = labels
        .into_iter()
        .map(|label| SensorEntry {
            name: label.best_name().to_string(),
            video: videos.remove(&label.sensor_id),
            label,
        })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct AssignVideoRequest {
    pub video_path: String,
    #[serde(default)]
    pub description: Option<String>,
}

async fn assign_video(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<SensorId>,
    ApiJson(body): ApiJson<AssignVideoRequest>,
) -> ApiResult<SensorVideo> {
    if body.video_path.trim().is_empty() {
        return Err(ApiError::BadRequest("video_path must not be empty".into()));
    }
    let roster = state.tracker.settings().await.sensor_pins;
    if !roster.is_empty() && !roster.contains(&sensor_id) {
        return Err(InputError::UnknownSensor(sensor_id).into());
    }

    let video = SensorVideo {
        sensor_id,
        video_path: body.video_path,
        description: body.description,
    };
    state.db.assign_video(video.clone()).await?;
    Ok(Json(video))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

async fn rename_sensor(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<SensorId>,
    ApiJson(body): ApiJson<RenameRequest>,
) -> ApiResult<Value> {
    let display_name = body
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    if !state
        .db
        .set_display_name(sensor_id, display_name.clone())
        .await?
    {
        return Err(ApiError::NotFound(format!("sensor {sensor_id} has no label")));
    }
    Ok(Json(json!({ "success": true, "display_name": display_name })))
}

async fn system_info(State(state): State<AppState>) -> ApiResult<SystemInfo> {
    let last_snapshot_at = state.tracker.last_snapshot_at().await;
    let info = state
        .metrics
        .system_info(state.tracker.stats(), last_snapshot_at, state.db.path())
        .await;
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use crate::sensing::JsonFileSource;
    use chrono::FixedOffset;
    use reqwest::StatusCode;

    struct TestServer {
        base: String,
        db: Database,
        _dirs: Vec<tempfile::TempDir>,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }
    }

    async fn serve(source: Option<Arc<dyn SnapshotSource>>) -> TestServer {
        let (db_dir, db) = temp_database();
        let settings_dir = tempfile::tempdir().unwrap();
        let settings =
            Arc::new(SettingsStore::new(settings_dir.path().join("settings.json")).unwrap());

        let ledger = Arc::new(db.clone());
        let tracker = Arc::new(Tracker::new(
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            settings.tracker().unwrap(),
        ));
        let state = AppState {
            tracker,
            summarizer: Summarizer::new(ledger, FixedOffset::east_opt(0).unwrap()),
            db: db.clone(),
            settings,
            metrics: MetricsCollector::new(),
            source,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            db,
            _dirs: vec![db_dir, settings_dir],
        }
    }

    #[tokio::test]
    async fn pushed_snapshots_open_and_close_activations() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let opened: Value = client
            .post(server.url("/api/sensor_status"))
            .json(&json!({ "active_sensors": [5] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(opened["success"], true);
        assert_eq!(opened["opened"].as_array().unwrap().len(), 1);
        assert_eq!(opened["active_sensors"], json!([5]));
        assert!(opened.get("activeSensors").is_none());

        let closed: Value = client
            .post(server.url("/api/sensor_status"))
            .json(&json!({ "active_sensors": [] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(closed["closed"][0]["sensorId"], 5);
        assert_eq!(closed["closed"][0]["completed"], true);

        let recent: Vec<Value> = client
            .get(server.url("/api/activations/recent?limit=5"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);

        let info: Value = client
            .get(server.url("/api/system_info"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info["tracker"]["activationsOpened"], 1);
        assert!(info["lastSnapshotAt"].is_string());
        assert_eq!(info["recentSnapshots"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_input_is_a_400() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let duplicate = client
            .post(server.url("/api/sensor_status"))
            .json(&json!({ "active_sensors": [5, 5] }))
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
        let body: Value = duplicate.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("more than once"));

        let mode = client
            .post(server.url("/api/config/versus_mode"))
            .json(&json!({ "mode": 5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(mode.status(), StatusCode::BAD_REQUEST);

        let range = client
            .get(server.url("/api/summary?from=tomorrow"))
            .send()
            .await
            .unwrap();
        assert_eq!(range.status(), StatusCode::BAD_REQUEST);

        let group = client
            .get(server.url("/api/summary?group_by=week"))
            .send()
            .await
            .unwrap();
        assert_eq!(group.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn config_updates_are_stored() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let response = client
            .post(server.url("/api/config/versus_mode"))
            .json(&json!({ "mode": 2 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        client
            .post(server.url("/api/config/debug"))
            .json(&json!({ "enabled": true }))
            .send()
            .await
            .unwrap();

        let stored = server.db.all_config().await.unwrap();
        assert_eq!(stored.get(VERSUS_MODE_KEY).map(String::as_str), Some("2"));
        assert_eq!(stored.get(DEBUG_ENABLED_KEY).map(String::as_str), Some("true"));

        let config: Value = client
            .get(server.url("/api/config"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(config["systemConfig"]["versus_mode"], "2");
        assert_eq!(config["settings"]["tracker"]["min_activation_ms"], 5000);
    }

    #[tokio::test]
    async fn register_below_threshold_is_refused_not_failed() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let short: Value = client
            .post(server.url("/api/register_activation"))
            .json(&json!({ "sensor_id": 17, "duration": 1200 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(short["success"], false);
        assert_eq!(short["accepted"], false);

        let long: Value = client
            .post(server.url("/api/register_activation"))
            .json(&json!({ "sensor_id": 17, "duration": 8000 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(long["success"], true);
        assert_eq!(long["activation"]["durationMs"], 8000);

        let ranking: Vec<Value> = client
            .get(server.url("/api/ranking"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0]["sensorId"], 17);
    }

    #[tokio::test]
    async fn pull_requires_a_source() {
        let server = serve(None).await;
        let response = reqwest::get(server.url("/api/sensor_status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.json");
        std::fs::write(&path, r#"{"active_sensors": [27]}"#).unwrap();
        let server = serve(Some(Arc::new(JsonFileSource::new(path)))).await;

        let body: Value = reqwest::get(server.url("/api/sensor_status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["active_sensors"], json!([27]));
        assert_eq!(body["opened"][0]["sensorId"], 27);
    }

    #[tokio::test]
    async fn sensors_can_be_renamed_and_given_videos() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let assigned = client
            .put(server.url("/api/sensors/17/video"))
            .json(&json!({ "video_path": "videos/serum.mp4" }))
            .send()
            .await
            .unwrap();
        assert_eq!(assigned.status(), StatusCode::OK);

        let renamed = client
            .put(server.url("/api/sensors/17/label"))
            .json(&json!({ "display_name": "Night Serum" }))
            .send()
            .await
            .unwrap();
        assert_eq!(renamed.status(), StatusCode::OK);

        let missing = client
            .put(server.url("/api/sensors/99/label"))
            .json(&json!({ "display_name": "Ghost" }))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let sensors: Vec<Value> = client
            .get(server.url("/api/sensors"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let serum = sensors
            .iter()
            .find(|entry| entry["sensorId"] == 17)
            .unwrap();
        assert_eq!(serum["name"], "Night Serum");
        assert_eq!(serum["video"]["videoPath"], "videos/serum.mp4");
    }

    #[tokio::test]
    async fn rebuild_then_read_materialised_metrics() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        client
            .post(server.url("/api/register_activation"))
            .json(&json!({ "sensor_id": 5, "duration": 6000 }))
            .send()
            .await
            .unwrap();

        let rebuilt: Value = client
            .post(server.url("/api/metrics/rebuild"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rebuilt["dailyRows"], 1);

        let daily: Vec<Value> = client
            .get(server.url("/api/metrics/daily"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0]["sensorId"], 5);
        assert_eq!(daily[0]["activationCount"], 1);

        let hourly: Vec<Value> = client
            .get(server.url("/api/metrics/hourly"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(hourly.len(), 1);
    }

    #[tokio::test]
    async fn malformed_requests_get_json_errors() {
        let server = serve(None).await;
        let client = reqwest::Client::new();

        let body = client
            .post(server.url("/api/sensor_status"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(body.status(), StatusCode::BAD_REQUEST);
        let error: Value = body.json().await.unwrap();
        assert_eq!(error["success"], false);
        assert!(error["error"].is_string());

        let missing_field = client
            .post(server.url("/api/register_activation"))
            .json(&json!({ "sensor_id": 17 }))
            .send()
            .await
            .unwrap();
        assert_eq!(missing_field.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let error: Value = missing_field.json().await.unwrap();
        assert!(error["error"].as_str().unwrap().contains("duration"));

        let query = client
            .get(server.url("/api/activations/recent?limit=lots"))
            .send()
            .await
            .unwrap();
        assert_eq!(query.status(), StatusCode::BAD_REQUEST);
        let error: Value = query.json().await.unwrap();
        assert_eq!(error["success"], false);

        let path = client
            .put(server.url("/api/sensors/shelf/label"))
            .json(&json!({ "display_name": "Serum" }))
            .send()
            .await
            .unwrap();
        assert_eq!(path.status(), StatusCode::BAD_REQUEST);
        let error: Value = path.json().await.unwrap();
        assert!(error["error"].is_string());
    }
}
