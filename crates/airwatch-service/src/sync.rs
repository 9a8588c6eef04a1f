//! Sync bridge: copies new history file records into the store.
//!
//! A pass selects the history entries whose `seq` is above the cursor,
//! get-or-creates the sensor and the reading for each one, then moves the
//! cursor to the highest `seq` seen. Records that fail to parse or persist
//! are counted and skipped; they never stop the rest of the batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use airwatch_store::{NewReading, NewSensor, Store};
use airwatch_types::RawReading;

use crate::events::EventLevel;
use crate::history::HistoryError;
use crate::state::{AppState, StopSignal};

/// Number of per-record errors included in a [`SyncReport`].
pub const MAX_ERROR_SAMPLES: usize = 5;

/// Errors that abort a whole sync pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Data file not found at {}", .0.display())]
    HistoryMissing(PathBuf),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Why a single history record could not be persisted.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] airwatch_store::Error),
}

/// A failed record, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    /// Position among this pass's candidates.
    pub index: usize,
    pub error: String,
    pub data: Value,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Entries in the history file.
    pub history_len: usize,
    /// Entries newer than the cursor.
    pub candidates: usize,
    /// Readings created by this pass.
    pub created: u64,
    /// Candidates already present in the store.
    pub duplicates: u64,
    /// Candidates that failed.
    pub errors: u64,
    /// Readings created by all passes since the last start or reset.
    pub total_synced: u64,
    pub cursor_before: u64,
    pub cursor_after: u64,
    /// Sensors created by this pass.
    pub sensors_created: Vec<String>,
    /// The first few failures.
    pub error_samples: Vec<RecordFailure>,
}

/// Run one sync pass over the history file.
///
/// Holds the store lock for the whole pass, so concurrent passes (the
/// background loop and a manual trigger) never interleave.
pub async fn run_sync(state: &AppState) -> Result<SyncReport, SyncError> {
    let store = state.store.lock().await;

    let entries = state
        .history
        .load()?
        .ok_or_else(|| SyncError::HistoryMissing(state.history.path().to_path_buf()))?;

    let cursor_before = state.sync.cursor();
    let mut report = SyncReport {
        history_len: entries.len(),
        cursor_before,
        cursor_after: cursor_before,
        ..Default::default()
    };

    let candidates = entries.iter().filter(|entry| entry.seq > cursor_before);
    for (index, entry) in candidates.enumerate() {
        report.candidates += 1;
        report.cursor_after = report.cursor_after.max(entry.seq);

        match persist_record(&store, &entry.record) {
            Ok(outcome) => {
                if outcome.reading_created {
                    report.created += 1;
                } else {
                    report.duplicates += 1;
                }
                if let Some(sensor) = outcome.sensor_created {
                    report.sensors_created.push(sensor);
                }
            }
            Err(e) => {
                warn!("Sync failed for history record {}: {}", entry.seq, e);
                report.errors += 1;
                if report.error_samples.len() < MAX_ERROR_SAMPLES {
                    report.error_samples.push(RecordFailure {
                        index,
                        error: e.to_string(),
                        data: entry.record.clone(),
                    });
                }
            }
        }
    }

    state.sync.set_cursor(report.cursor_after);
    report.total_synced = state.sync.add_synced(report.created);
    state.sync.mark_synced_now();
    drop(store);

    debug!(
        "Sync pass: {} candidates, {} created, {} duplicates, {} errors",
        report.candidates, report.created, report.duplicates, report.errors
    );
    Ok(report)
}

struct PersistOutcome {
    reading_created: bool,
    sensor_created: Option<String>,
}

fn persist_record(store: &Store, record: &Value) -> Result<PersistOutcome, RecordError> {
    let raw: RawReading = serde_json::from_value(record.clone())?;

    let (sensor, sensor_created) = store.get_or_create_sensor(&NewSensor::from_raw(&raw))?;
    let mut reading = NewReading::from_raw(&raw);
    reading.sensor_id = Some(sensor.id.clone());
    let (_, reading_created) = store.get_or_create_reading(&reading)?;

    Ok(PersistOutcome {
        reading_created,
        sensor_created: sensor_created.then_some(sensor.id),
    })
}

/// Start the background sync loop.
///
/// Resets the cursor and the running total. Returns `false` if the loop was
/// already running.
pub async fn start(state: &Arc<AppState>) -> bool {
    let Some(stop) = state.sync.control.begin() else {
        return false;
    };
    state.sync.reset();

    let interval = state.config.read().await.sync.interval();
    let handle = tokio::spawn(run_loop(Arc::clone(state), stop));
    state.sync.control.attach(handle).await;

    state
        .log_event(
            EventLevel::System,
            format!(
                "Database sync auto-started ({}s interval)",
                interval.as_secs_f64()
            ),
        )
        .await;
    true
}

/// Stop the background sync loop, waiting up to `timeout` for it to exit.
///
/// Returns `false` if it was not running.
pub async fn stop(state: &AppState, timeout: Duration) -> bool {
    if !state.sync.control.is_running() {
        return false;
    }

    state.sync.control.signal_stop();
    if !state.sync.control.wait_for_exit(timeout).await {
        warn!("Sync loop did not exit within {:?}", timeout);
    }

    state
        .log_event(
            EventLevel::System,
            format!(
                "Database sync stopped (Total synced: {})",
                state.sync.total_synced()
            ),
        )
        .await;
    true
}

async fn run_loop(state: Arc<AppState>, mut stop: StopSignal) {
    info!("Sync loop started");

    loop {
        let interval = state.config.read().await.sync.interval();

        // Sync at most once per interval
        tokio::select! {
            _ = stop.stopped() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        // Then go as soon as the simulation has written something, or after
        // another interval for files written by someone else
        tokio::select! {
            _ = stop.stopped() => break,
            _ = state.sync.history_written.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }

        sync_once(&state).await;
    }

    info!("Sync loop stopped");
}

async fn sync_once(state: &AppState) {
    match run_sync(state).await {
        Ok(report) if report.candidates == 0 => {
            state
                .log_event(EventLevel::Debug, "No new readings to sync")
                .await;
        }
        Ok(report) => {
            for sensor in &report.sensors_created {
                state
                    .log_event(
                        EventLevel::Info,
                        format!("Created new sensor in DB: {sensor}"),
                    )
                    .await;
            }
            state
                .log_event(
                    EventLevel::Success,
                    format!(
                        "Database sync: {} added, {} duplicates, {} errors (total synced: {})",
                        report.created, report.duplicates, report.errors, report.total_synced
                    ),
                )
                .await;
        }
        Err(SyncError::HistoryMissing(_)) => {
            state
                .log_event(EventLevel::Debug, "No data file found, skipping sync")
                .await;
        }
        Err(e) => {
            state
                .log_event(EventLevel::Error, format!("Database sync error: {e}"))
                .await;
        }
    }
}
