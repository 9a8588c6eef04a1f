//! REST API endpoints for the airwatch-service.
//!
//! Routes cover simulation control, the sync bridge, sensors, readings,
//! forecasts and blog posts.
//!
//! # Lock Ordering
//!
//! When multiple locks are needed, acquire in this order:
//! 1. `config`
//! 2. `store`
//! 3. `live`
//!
//! # Error Handling
//!
//! Endpoints return structured JSON errors via [`AppError`]. Simulation
//! control requests that do not apply in the current state are not errors;
//! they answer `200` with `success: false`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use airwatch_store::{
    BlogPost, NewReading, NewSensor, PostInput, ReadingQuery, StoredReading, StoredSensor,
};
use airwatch_types::{RawReading, parse_timestamp};

use crate::events::{EventEntry, EventLevel};
use crate::forecast::{Forecast, ForecastError, forecast_sensor};
use crate::history::HistoryDiagnostics;
use crate::simulator::Simulation;
use crate::state::AppState;
use crate::sync::{SyncError, SyncReport, run_sync};

/// Default `hours` window for per-sensor readings.
const DEFAULT_WINDOW_HOURS: u32 = 24;
/// Largest accepted `hours` window for per-sensor readings (one year).
pub const MAX_WINDOW_HOURS: u32 = 8760;
/// Default page size for reading queries.
const DEFAULT_LIMIT: u32 = 100;
/// Upper bound on any reading query page.
const MAX_LIMIT: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Simulation control
        .route("/api/simulation/start", post(simulation_start))
        .route("/api/simulation/stop", post(simulation_stop))
        .route("/api/simulation/reset", post(simulation_reset))
        .route("/api/simulation/status", get(simulation_status))
        .route("/api/simulation/sensor-count", put(set_sensor_count))
        .route("/api/simulation/snapshot", get(get_snapshot))
        .route("/api/simulation/history", get(get_history))
        .route("/api/simulation/logs", get(get_logs))
        .route("/api/simulation/debug", get(get_debug))
        .route("/api/sync", post(sync_now))
        // Sensors
        .route("/api/sensors", get(list_sensors))
        .route("/api/sensors/{id}", get(get_sensor))
        .route("/api/sensors/{id}/readings", get(get_sensor_readings))
        .route("/api/sensors/{id}/forecast", get(get_forecast))
        // Readings
        .route("/api/readings", get(query_readings))
        .route("/api/readings/{id}", get(get_reading))
        .route("/api/readings/ingest", post(ingest_reading))
        .route("/api/readings/bulk-ingest", post(bulk_ingest))
        // Blog
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

// ==========================================================================
// Simulation Endpoints
// ==========================================================================

/// Response for simulation control actions.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub running: bool,
}

async fn simulation_start(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    let simulation = Simulation::new(Arc::clone(&state));
    let response = match simulation.start().await {
        Ok(()) => ControlResponse {
            success: true,
            message: "Simulation started".to_string(),
            running: true,
        },
        Err(e) => ControlResponse {
            success: false,
            message: e.to_string(),
            running: state.simulation.is_running(),
        },
    };
    Json(response)
}

async fn simulation_stop(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    let simulation = Simulation::new(Arc::clone(&state));
    let response = match simulation.stop().await {
        Ok(outcome) if outcome.exited => ControlResponse {
            success: true,
            message: format!(
                "Simulation stopped (Total synced: {})",
                outcome.total_synced
            ),
            running: false,
        },
        Ok(outcome) => ControlResponse {
            success: true,
            message: format!(
                "Simulation stopped, current tick still finishing (Total synced: {})",
                outcome.total_synced
            ),
            running: false,
        },
        Err(e) => ControlResponse {
            success: false,
            message: e.to_string(),
            running: state.simulation.is_running(),
        },
    };
    Json(response)
}

async fn simulation_reset(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    Simulation::new(Arc::clone(&state)).reset().await;
    Json(ControlResponse {
        success: true,
        message: "Simulation reset".to_string(),
        running: false,
    })
}

/// Simulation and sync status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub uptime_seconds: Option<u64>,
    /// Entries in the in-memory event log.
    pub log_count: usize,
    /// Readings in the current snapshot.
    pub sensor_count: usize,
    /// Configured number of simulated sensors.
    pub active_sensors: usize,
    pub ticks: u64,
    pub history_count: usize,
    pub sync: SyncStatus,
}

/// Sync bridge part of [`StatusResponse`].
#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub total_synced: u64,
    /// `seq` of the last history entry persisted.
    pub cursor: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync_at: Option<OffsetDateTime>,
}

async fn simulation_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let started_at = state.simulation.started_at();
    let uptime_seconds = started_at.map(|s| {
        let now = OffsetDateTime::now_utc();
        (now - s).whole_seconds().max(0) as u64
    });

    let live = state.live.lock().await;
    Json(StatusResponse {
        running: state.simulation.is_running(),
        started_at,
        uptime_seconds,
        log_count: live.events.len(),
        sensor_count: live.snapshot.len(),
        active_sensors: live.active_sensors(),
        ticks: live.ticks,
        history_count: live.history_len,
        sync: SyncStatus {
            running: state.sync.control.is_running(),
            total_synced: state.sync.total_synced(),
            cursor: state.sync.cursor(),
            last_sync_at: state.sync.last_sync_at(),
        },
    })
}

/// Request body for setting the simulated sensor count.
#[derive(Debug, Deserialize)]
pub struct SensorCountRequest {
    pub count: i64,
}

/// Response for a sensor count change.
#[derive(Debug, Serialize)]
pub struct SensorCountResponse {
    pub success: bool,
    pub requested: i64,
    /// Count actually applied after clamping.
    pub active_sensors: usize,
}

async fn set_sensor_count(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SensorCountRequest>,
) -> Json<SensorCountResponse> {
    let requested = usize::try_from(request.count.max(0)).unwrap_or(usize::MAX);
    let applied = state.live.lock().await.set_active_sensors(requested);
    state
        .log_event(
            EventLevel::System,
            format!("Active sensor count set to {applied}"),
        )
        .await;

    Json(SensorCountResponse {
        success: true,
        requested: request.count,
        active_sensors: applied,
    })
}

/// The most recent simulated batch.
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub readings: Vec<RawReading>,
    pub count: usize,
    pub history_count: usize,
    pub tick: u64,
}

async fn get_snapshot(State(state): State<Arc<AppState>>) -> Json<SnapshotResponse> {
    let live = state.live.lock().await;
    Json(SnapshotResponse {
        readings: live.snapshot.clone(),
        count: live.snapshot.len(),
        history_count: live.history_len,
        tick: live.ticks,
    })
}

/// Query parameters for the history file endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
    pub sensor: Option<String>,
    pub limit: Option<usize>,
}

/// History file contents, oldest first.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub readings: Vec<Value>,
    pub count: usize,
    /// Records in the file before filtering.
    pub total: usize,
}

/// Read the history file, optionally filtered by sensor id and limited to
/// the most recent `limit` records.
async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let entries = state
        .history
        .load()
        .map_err(|e| AppError::Internal(e.to_string()))?
        .unwrap_or_default();
    let total = entries.len();

    let mut readings: Vec<Value> = entries
        .into_iter()
        .filter(|e| match params.sensor.as_deref() {
            Some(sensor) => e.sensor_name() == Some(sensor),
            None => true,
        })
        .map(|e| e.record)
        .collect();

    if let Some(limit) = params.limit
        && readings.len() > limit
    {
        readings.drain(..readings.len() - limit);
    }

    Ok(Json(HistoryResponse {
        count: readings.len(),
        readings,
        total,
    }))
}

/// In-memory event log.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<EventEntry>,
    pub count: usize,
}

async fn get_logs(State(state): State<Arc<AppState>>) -> Json<LogsResponse> {
    let logs = state.live.lock().await.events.entries();
    Json(LogsResponse {
        count: logs.len(),
        logs,
    })
}

/// Diagnostics for the simulation's files and memory.
#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub history_file: HistoryDiagnostics,
    pub memory: MemoryDiagnostics,
    pub database: DatabaseDiagnostics,
    pub simulation_running: bool,
    pub sync_running: bool,
}

#[derive(Debug, Serialize)]
pub struct MemoryDiagnostics {
    pub snapshot_size: usize,
    pub log_count: usize,
    pub history_count: usize,
    pub ticks: u64,
}

#[derive(Debug, Serialize)]
pub struct DatabaseDiagnostics {
    pub ok: bool,
    pub sensor_count: usize,
    pub reading_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn get_debug(State(state): State<Arc<AppState>>) -> Json<DebugResponse> {
    let history_file = state.history.diagnostics();

    let database = {
        let store = state.store.lock().await;
        match store
            .list_sensors(false)
            .and_then(|sensors| Ok((sensors.len(), store.count_readings(None)?)))
        {
            Ok((sensor_count, reading_count)) => DatabaseDiagnostics {
                ok: true,
                sensor_count,
                reading_count,
                error: None,
            },
            Err(e) => DatabaseDiagnostics {
                ok: false,
                sensor_count: 0,
                reading_count: 0,
                error: Some(e.to_string()),
            },
        }
    };

    let memory = {
        let live = state.live.lock().await;
        MemoryDiagnostics {
            snapshot_size: live.snapshot.len(),
            log_count: live.events.len(),
            history_count: live.history_len,
            ticks: live.ticks,
        }
    };

    Json(DebugResponse {
        history_file,
        memory,
        database,
        simulation_running: state.simulation.is_running(),
        sync_running: state.sync.control.is_running(),
    })
}

/// Result of a manual sync.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub report: Option<SyncReport>,
}

/// Copy new history entries into the database now.
async fn sync_now(State(state): State<Arc<AppState>>) -> Json<SyncResponse> {
    let response = match run_sync(&state).await {
        Ok(report) => SyncResponse {
            success: true,
            message: format!(
                "Synced {} new readings ({} duplicates, {} errors)",
                report.created, report.duplicates, report.errors
            ),
            report: Some(report),
        },
        Err(e @ SyncError::HistoryMissing(_)) => SyncResponse {
            success: false,
            message: e.to_string(),
            report: None,
        },
        Err(e) => {
            warn!("Manual sync failed: {}", e);
            SyncResponse {
                success: false,
                message: e.to_string(),
                report: None,
            }
        }
    };
    Json(response)
}

// ==========================================================================
// Sensor Endpoints
// ==========================================================================

/// A sensor together with its newest stored reading.
#[derive(Debug, Serialize)]
pub struct SensorResponse {
    #[serde(flatten)]
    pub sensor: StoredSensor,
    pub latest_reading: Option<StoredReading>,
}

/// List active sensors, each with its latest reading.
async fn list_sensors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SensorResponse>>, AppError> {
    let store = state.store.lock().await;
    let sensors = store
        .list_sensors(true)?
        .into_iter()
        .map(|sensor| {
            let latest_reading = store.latest_reading(&sensor.id)?;
            Ok(SensorResponse {
                sensor,
                latest_reading,
            })
        })
        .collect::<Result<Vec<_>, airwatch_store::Error>>()?;
    Ok(Json(sensors))
}

async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SensorResponse>, AppError> {
    let store = state.store.lock().await;
    let sensor = store
        .get_sensor(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Sensor not found: {}", id)))?;
    let latest_reading = store.latest_reading(&id)?;
    Ok(Json(SensorResponse {
        sensor,
        latest_reading,
    }))
}

/// Query parameters for per-sensor readings.
#[derive(Debug, Deserialize, Default)]
pub struct SensorReadingsParams {
    pub hours: Option<u32>,
    pub limit: Option<u32>,
}

/// Readings of one sensor in a trailing window.
#[derive(Debug, Serialize)]
pub struct SensorReadingsResponse {
    pub sensor_id: String,
    pub hours: u32,
    pub count: usize,
    pub readings: Vec<StoredReading>,
}

/// Readings of a sensor from the last `hours` hours (default 24), newest
/// first, at most `limit` (default 100).
async fn get_sensor_readings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<SensorReadingsParams>,
) -> Result<Json<SensorReadingsResponse>, AppError> {
    let hours = params.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
    if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
        return Err(AppError::BadRequest(format!(
            "'hours' must be between 1 and {}",
            MAX_WINDOW_HOURS
        )));
    }
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let since = OffsetDateTime::now_utc()
        .checked_sub(Duration::hours(i64::from(hours)))
        .ok_or_else(|| AppError::BadRequest(format!("'hours' is out of range: {}", hours)))?;

    let store = state.store.lock().await;
    if store.get_sensor(&id)?.is_none() {
        return Err(AppError::NotFound(format!("Sensor not found: {}", id)));
    }

    let query = ReadingQuery::new().sensor(&id).since(since).limit(limit);
    let readings = store.query_readings(&query)?;

    Ok(Json(SensorReadingsResponse {
        sensor_id: id,
        hours,
        count: readings.len(),
        readings,
    }))
}

/// Forecast for one sensor.
#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    pub sensor_id: String,
    #[serde(flatten)]
    pub forecast: Forecast,
}

async fn get_forecast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ForecastResponse>, AppError> {
    let config = state.config.read().await.forecast.clone();
    let store = state.store.lock().await;
    let forecast = forecast_sensor(&store, &id, OffsetDateTime::now_utc(), &config)?;
    Ok(Json(ForecastResponse {
        sensor_id: id,
        forecast,
    }))
}

// ==========================================================================
// Reading Endpoints
// ==========================================================================

/// Query parameters for readings.
#[derive(Debug, Deserialize, Default)]
pub struct ReadingsParams {
    /// Stable sensor id or numeric slave id.
    pub sensor: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ReadingsParams {
    /// Parse the time bounds. Returns an error for unparseable values or
    /// `from > to`.
    pub fn time_range(&self) -> Result<(Option<OffsetDateTime>, Option<OffsetDateTime>), AppError> {
        let parse = |name: &str, value: &Option<String>| {
            value
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(|e| AppError::BadRequest(format!("Invalid '{}': {}", name, e)))
        };
        let from = parse("from", &self.from)?;
        let to = parse("to", &self.to)?;

        if let (Some(from), Some(to)) = (from, to)
            && from > to
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'from' ({}) must not be after 'to' ({})",
                from, to
            )));
        }
        Ok((from, to))
    }
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub count: usize,
    pub offset: u32,
    pub limit: u32,
    /// Whether there are more items available.
    pub has_more: bool,
}

/// Query readings across sensors, newest first.
async fn query_readings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReadingsParams>,
) -> Result<Json<PaginatedResponse<StoredReading>>, AppError> {
    let (from, to) = params.time_range()?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    // Fetch one extra row to learn whether another page exists
    let mut query = ReadingQuery::new().limit(limit + 1).offset(offset);
    if let Some(sensor) = params.sensor.as_deref() {
        query = query.sensor_or_slave(sensor);
    }
    if let Some(from) = from {
        query = query.since(from);
    }
    if let Some(to) = to {
        query = query.until(to);
    }

    let mut readings = state.store.lock().await.query_readings(&query)?;
    let has_more = readings.len() > limit as usize;
    readings.truncate(limit as usize);

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: readings.len(),
            offset,
            limit,
            has_more,
        },
        data: readings,
    }))
}

async fn get_reading(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StoredReading>, AppError> {
    let reading = state
        .store
        .lock()
        .await
        .get_reading(id)?
        .ok_or_else(|| AppError::NotFound(format!("Reading not found: {}", id)))?;
    Ok(Json(reading))
}

/// A reading pushed by an external sensor gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    /// Stable sensor id; an unknown id creates the sensor.
    pub sensor_id: Option<String>,
    /// Display name for a newly created sensor.
    pub sensor_name: Option<String>,
    pub slave_id: Option<u32>,
    /// Defaults to the time of ingestion.
    pub timestamp: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    /// PM2.5 level.
    pub air_quality: Option<f64>,
    #[serde(default)]
    pub aqi_category: String,
    #[serde(default)]
    pub aqi_color: String,
    pub co_level: Option<f64>,
    pub no_level: Option<f64>,
    pub smoke: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl IngestRequest {
    /// Check value ranges and build the rows to store.
    pub fn validate(&self) -> Result<(Option<NewSensor>, NewReading), String> {
        check_range("temperature", self.temperature, -50.0, 60.0)?;
        check_range("humidity", self.humidity, 0.0, 100.0)?;
        check_range("air_quality", self.air_quality, 0.0, 500.0)?;

        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => parse_timestamp(raw).map_err(|e| e.to_string())?,
            None => OffsetDateTime::now_utc(),
        };

        let sensor_id = self
            .sensor_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let sensor = sensor_id.map(|id| NewSensor {
            id: id.to_string(),
            name: self.sensor_name.clone().unwrap_or_else(|| id.to_string()),
            area: String::new(),
            latitude: self.latitude,
            longitude: self.longitude,
        });

        let reading = NewReading {
            sensor_id: sensor_id.map(str::to_string),
            slave_id: self.slave_id,
            timestamp: Some(timestamp),
            temperature: self.temperature,
            humidity: self.humidity,
            air_quality: self.air_quality,
            aqi: None,
            aqi_category: self.aqi_category.clone(),
            aqi_color: self.aqi_color.clone(),
            co_level: self.co_level,
            no_level: self.no_level,
            smoke: self.smoke,
            latitude: self.latitude,
            longitude: self.longitude,
        };

        Ok((sensor, reading))
    }
}

fn check_range(field: &str, value: Option<f64>, min: f64, max: f64) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => Err(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, v
        )),
        _ => Ok(()),
    }
}

/// Validate and store one ingest payload.
fn store_ingest(
    store: &airwatch_store::Store,
    request: &IngestRequest,
) -> Result<StoredReading, AppError> {
    let (sensor, reading) = request.validate().map_err(AppError::BadRequest)?;
    if let Some(sensor) = sensor {
        let (_, created) = store.get_or_create_sensor(&sensor)?;
        if created {
            info!("Created sensor {} from ingest", sensor.id);
        }
    }
    Ok(store.insert_reading(&reading)?)
}

async fn ingest_reading(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<StoredReading>), AppError> {
    let store = state.store.lock().await;
    let reading = store_ingest(&store, &request)?;
    Ok((StatusCode::CREATED, Json(reading)))
}

/// Result of a bulk ingest.
#[derive(Debug, Serialize)]
pub struct BulkIngestResponse {
    pub created: Vec<i64>,
    pub created_count: usize,
    pub errors: Vec<BulkIngestError>,
}

#[derive(Debug, Serialize)]
pub struct BulkIngestError {
    pub index: usize,
    pub error: String,
}

/// Ingest an array of readings. Each element is validated on its own, so
/// one bad element does not reject the others.
async fn bulk_ingest(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<Value>>,
) -> (StatusCode, Json<BulkIngestResponse>) {
    let mut created = Vec::new();
    let mut errors = Vec::new();

    let store = state.store.lock().await;
    for (index, item) in items.into_iter().enumerate() {
        let result = serde_json::from_value::<IngestRequest>(item)
            .map_err(|e| AppError::BadRequest(e.to_string()))
            .and_then(|request| store_ingest(&store, &request));
        match result {
            Ok(reading) => created.push(reading.id),
            Err(e) => errors.push(BulkIngestError {
                index,
                error: e.message(),
            }),
        }
    }
    drop(store);

    let status = if created.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    (
        status,
        Json(BulkIngestResponse {
            created_count: created.len(),
            created,
            errors,
        }),
    )
}

// ==========================================================================
// Blog Endpoints
// ==========================================================================

#[derive(Debug, Deserialize, Default)]
pub struct PostListParams {
    /// Include drafts as well as published posts.
    #[serde(default)]
    pub include_drafts: bool,
}

/// List posts, newest publication first.
async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PostListParams>,
) -> Result<Json<Vec<BlogPost>>, AppError> {
    let posts = state
        .store
        .lock()
        .await
        .list_posts(!params.include_drafts)?;
    Ok(Json(posts))
}

fn validate_post(input: &PostInput) -> Result<(), AppError> {
    if input.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }
    if input.slug.trim().is_empty() {
        return Err(AppError::BadRequest("slug must not be empty".to_string()));
    }
    Ok(())
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PostInput>,
) -> Result<(StatusCode, Json<BlogPost>), AppError> {
    validate_post(&input)?;
    let post = state.store.lock().await.create_post(&input)?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<BlogPost>, AppError> {
    let post = state
        .store
        .lock()
        .await
        .get_post(id)?
        .ok_or_else(|| AppError::NotFound(format!("Post not found: {}", id)))?;
    Ok(Json(post))
}

async fn update_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<PostInput>,
) -> Result<Json<BlogPost>, AppError> {
    validate_post(&input)?;
    let post = state.store.lock().await.update_post(id, &input)?;
    Ok(Json(post))
}

async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.store.lock().await.delete_post(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ==========================================================================
// Errors
// ==========================================================================

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Store(airwatch_store::Error),
    Forecast(ForecastError),
    Internal(String),
}

impl AppError {
    fn message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Store(e) => e.to_string(),
            AppError::Forecast(e) => e.to_string(),
        }
    }
}

impl From<airwatch_store::Error> for AppError {
    fn from(e: airwatch_store::Error) -> Self {
        use airwatch_store::Error;
        match e {
            Error::SensorNotFound(_) | Error::ReadingNotFound(_) | Error::PostNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            Error::DuplicateReading { .. } | Error::DuplicateSlug(_) => {
                AppError::Conflict(e.to_string())
            }
            e => AppError::Store(e),
        }
    }
}

impl From<ForecastError> for AppError {
    fn from(e: ForecastError) -> Self {
        AppError::Forecast(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if let AppError::Forecast(e) = &self {
            let status = match e {
                ForecastError::SensorNotFound(_) | ForecastError::NoData { .. } => {
                    StatusCode::NOT_FOUND
                }
                ForecastError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ForecastError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = serde_json::json!({
                "error": e.to_string(),
                "code": e.code(),
            });
            return (status, Json(body)).into_response();
        }

        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.message(),
        });

        (status, Json(body)).into_response()
    }
}
