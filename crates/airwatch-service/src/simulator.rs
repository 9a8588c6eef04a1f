//! Background sensor simulation.
//!
//! Every tick generates one reading per active sensor, publishes the batch
//! as the live snapshot, appends it to the bounded history buffer and
//! rewrites the history file. The sync bridge is started and stopped
//! together with the simulation.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use airwatch_types::{RawReading, active_roster};

use crate::events::EventLevel;
use crate::history::{HistoryBuffer, HistoryError};
use crate::state::{AppState, SnapshotEvent, StopSignal};
use crate::sync;

/// Control requests that do not apply in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("Simulation already running")]
    AlreadyRunning,
    #[error("Simulation not running")]
    NotRunning,
}

/// Result of a successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// Whether the loop exited within the stop timeout.
    pub exited: bool,
    /// Readings synced since the last start.
    pub total_synced: u64,
}

/// Starts, stops and resets the simulation and its sync bridge.
pub struct Simulation {
    state: Arc<AppState>,
}

impl Simulation {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the simulation loop and, if idle, the sync bridge.
    ///
    /// Clears the event log and loads whatever history is on disk; a missing
    /// or unreadable file starts an empty history.
    pub async fn start(&self) -> Result<(), ControlError> {
        let state = &self.state;
        let stop = state
            .simulation
            .begin()
            .ok_or(ControlError::AlreadyRunning)?;

        {
            let mut live = state.live.lock().await;
            live.events.clear();
            live.ticks = 0;
        }

        state
            .log_event(EventLevel::System, "Sensor simulation initialized")
            .await;
        state
            .log_event(
                EventLevel::Debug,
                format!("Data file path: {}", state.history.path().display()),
            )
            .await;

        let buffer = self.load_history().await;
        state.live.lock().await.history_len = buffer.len();

        let handle = tokio::spawn(run_loop(Arc::clone(state), buffer, stop));
        state.simulation.attach(handle).await;

        sync::start(state).await;
        Ok(())
    }

    async fn load_history(&self) -> HistoryBuffer {
        let state = &self.state;
        let (level, message, entries) = match state.history.load() {
            Ok(Some(entries)) if entries.is_empty() => (
                EventLevel::Info,
                "Data file exists but is empty, starting fresh".to_string(),
                entries,
            ),
            Ok(Some(entries)) => (
                EventLevel::Info,
                format!("Loaded {} existing readings", entries.len()),
                entries,
            ),
            Ok(None) => (
                EventLevel::Info,
                "No existing data file, starting fresh".to_string(),
                Vec::new(),
            ),
            Err(e) => (
                EventLevel::Error,
                format!("Error loading existing data: {e}. Starting fresh."),
                Vec::new(),
            ),
        };
        state.log_event(level, message).await;
        HistoryBuffer::from_entries(entries)
    }

    /// Stop the simulation loop and the sync bridge.
    ///
    /// Waits up to the configured stop timeout for each task and returns
    /// either way.
    pub async fn stop(&self) -> Result<StopOutcome, ControlError> {
        let state = &self.state;
        if !state.simulation.is_running() {
            return Err(ControlError::NotRunning);
        }

        let timeout = state.config.read().await.simulation.stop_timeout();

        state.simulation.signal_stop();
        let exited = state.simulation.wait_for_exit(timeout).await;
        if !exited {
            warn!("Simulation loop did not exit within {:?}", timeout);
        }

        sync::stop(state, timeout).await;

        Ok(StopOutcome {
            exited,
            total_synced: state.sync.total_synced(),
        })
    }

    /// Stop everything and forget all simulation state.
    ///
    /// Clears the event log, the snapshot, the sync progress and the history
    /// file. The active sensor count is kept.
    pub async fn reset(&self) {
        let state = &self.state;
        if state.simulation.is_running() {
            let _ = self.stop().await;
        }
        let timeout = state.config.read().await.simulation.stop_timeout();
        sync::stop(state, timeout).await;

        {
            let mut live = state.live.lock().await;
            live.events.clear();
            live.snapshot.clear();
            live.ticks = 0;
            live.history_len = 0;
        }
        state.sync.reset();

        if let Err(e) = state.history.clear() {
            warn!("Failed to clear history file: {}", e);
        }
        info!("Simulation reset");
    }
}

async fn run_loop(state: Arc<AppState>, mut buffer: HistoryBuffer, mut stop: StopSignal) {
    let mut rng = StdRng::from_os_rng();

    while !stop.is_stopped() {
        let (tick_interval, backoff) = {
            let config = state.config.read().await;
            (
                config.simulation.tick_interval(),
                config.simulation.error_backoff(),
            )
        };

        let delay = match tick(&state, &mut buffer, &mut rng, &stop).await {
            Ok(()) => tick_interval,
            Err(e) => {
                state
                    .log_event(EventLevel::Error, format!("Simulation error: {e}"))
                    .await;
                backoff
            }
        };

        tokio::select! {
            _ = stop.stopped() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state
        .log_event(
            EventLevel::System,
            format!("Simulation stopped - Final history count: {}", buffer.len()),
        )
        .await;
}

/// Run one simulation step.
///
/// The snapshot is published before the history is written, so a failed
/// write still leaves the new batch visible; it is persisted with the next
/// successful write. Once `stop` fires the file is left alone, since a newer
/// run or a reset may own it by then.
pub async fn tick<R: Rng>(
    state: &AppState,
    buffer: &mut HistoryBuffer,
    rng: &mut R,
    stop: &StopSignal,
) -> Result<(), HistoryError> {
    let max_history = state.config.read().await.simulation.max_history;
    let now = OffsetDateTime::now_utc();

    let (batch, tick) = {
        let mut live = state.live.lock().await;
        let batch: Vec<RawReading> = active_roster(live.active_sensors())
            .iter()
            .map(|sensor| {
                let mut reading = RawReading::generate(sensor, rng, now);
                reading.seq = buffer.next_seq();
                reading
            })
            .collect();
        live.snapshot = batch.clone();
        live.ticks += 1;
        (batch, live.ticks)
    };

    state
        .log_event(
            EventLevel::Info,
            format!("Monitoring {} sensors", batch.len()),
        )
        .await;
    for reading in &batch {
        state
            .log_event(
                EventLevel::Data,
                format!(
                    "{} | AQI: {} ({}) | PM2.5: {} µg/m³ | Temp: {}°C",
                    reading.name,
                    reading.aqi,
                    reading.aqi_category,
                    reading.pm25,
                    reading.temperature
                ),
            )
            .await;
    }

    // No subscribers is fine
    let _ = state.snapshots_tx.send(SnapshotEvent {
        tick,
        timestamp: now,
        readings: batch.clone(),
    });

    for reading in &batch {
        buffer.push(reading)?;
    }

    let before = buffer.len();
    if buffer.trim(max_history) > 0 {
        state
            .log_event(
                EventLevel::Info,
                format!(
                    "Trimmed history from {} to {} readings",
                    before,
                    buffer.len()
                ),
            )
            .await;
    }

    if stop.is_stopped() {
        debug!("Run stopped, skipping history write of tick {}", tick);
        return Ok(());
    }
    state.history.write(buffer.entries())?;
    state.live.lock().await.history_len = buffer.len();
    state.sync.history_written.notify_one();

    state
        .log_event(
            EventLevel::Debug,
            format!("Saved {} total readings to file", buffer.len()),
        )
        .await;
    state
        .log_event(
            EventLevel::Success,
            format!(
                "Network scan #{} complete - {} sensors online (Total history: {})",
                tick,
                batch.len(),
                buffer.len()
            ),
        )
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::TaskControl;
    use airwatch_store::Store;
    use std::time::Duration;

    /// Stop signal of a run that is never stopped.
    fn running() -> StopSignal {
        TaskControl::new().begin().unwrap()
    }

    fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let mut config = Config::default();
        config.storage.history_path = Some(dir.path().join("history.json"));
        config.simulation.stop_timeout_ms = 500;
        AppState::new(Store::open_in_memory().unwrap(), config)
    }

    #[tokio::test]
    async fn test_tick_with_three_sensors() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        state.live.lock().await.set_active_sensors(3);

        let mut buffer = HistoryBuffer::default();
        let mut rng = StdRng::seed_from_u64(1);
        tick(&state, &mut buffer, &mut rng, &running())
            .await
            .unwrap();

        let live = state.live.lock().await;
        assert_eq!(live.snapshot.len(), 3);
        assert_eq!(live.ticks, 1);
        assert_eq!(live.history_len, 3);
        let names: Vec<_> = live.snapshot.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["KP-002", "KP-003", "KP-005"]);
        let seqs: Vec<_> = live.snapshot.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        drop(live);

        let on_disk = state.history.load().unwrap().unwrap();
        assert_eq!(on_disk.len(), 3);
    }

    #[tokio::test]
    async fn test_tick_trims_history() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        state.config.write().await.simulation.max_history = 5;
        state.live.lock().await.set_active_sensors(2);

        let mut buffer = HistoryBuffer::default();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..4 {
            tick(&state, &mut buffer, &mut rng, &running())
                .await
                .unwrap();
        }

        let on_disk = state.history.load().unwrap().unwrap();
        let seqs: Vec<_> = on_disk.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6, 7, 8]);

        let live = state.live.lock().await;
        assert!(
            live.events
                .entries()
                .iter()
                .any(|e| e.message == "Trimmed history from 8 to 5 readings")
        );
    }

    #[tokio::test]
    async fn test_tick_broadcasts_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let mut rx = state.snapshots_tx.subscribe();

        let mut buffer = HistoryBuffer::default();
        tick(
            &state,
            &mut buffer,
            &mut StdRng::seed_from_u64(3),
            &running(),
        )
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.tick, 1);
        assert_eq!(event.readings.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // The history path is a directory, so the rename fails
        let blocked = dir.path().join("blocked");
        std::fs::create_dir_all(blocked.join("inner")).unwrap();
        let mut config = Config::default();
        config.storage.history_path = Some(blocked);
        let state = AppState::new(Store::open_in_memory().unwrap(), config);

        let mut buffer = HistoryBuffer::default();
        let mut rng = StdRng::seed_from_u64(4);
        let result = tick(&state, &mut buffer, &mut rng, &running()).await;
        assert!(matches!(result, Err(HistoryError::Io { .. })));
        // The batch is kept for the next write
        assert_eq!(buffer.len(), 1);
        assert_eq!(state.live.lock().await.snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_tick_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let mut rng = StdRng::seed_from_u64(6);

        let control = TaskControl::new();
        let stop = control.begin().unwrap();
        let mut buffer = HistoryBuffer::default();
        tick(&state, &mut buffer, &mut rng, &stop).await.unwrap();
        assert_eq!(state.history.load().unwrap().unwrap().len(), 1);

        // A reset clears the file while this run is still finishing a tick
        control.signal_stop();
        state.history.clear().unwrap();
        state.live.lock().await.history_len = 0;

        tick(&state, &mut buffer, &mut rng, &stop).await.unwrap();
        assert_eq!(state.history.load().unwrap(), Some(Vec::new()));
        assert_eq!(state.live.lock().await.history_len, 0);
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_recovers_after_failed_write() {
        let dir = tempfile::tempdir().unwrap();
        // The history path is a directory until the test removes it
        let blocked = dir.path().join("blocked");
        std::fs::create_dir_all(blocked.join("inner")).unwrap();
        let mut config = Config::default();
        config.storage.history_path = Some(blocked.clone());
        config.simulation.stop_timeout_ms = 500;
        let state = AppState::new(Store::open_in_memory().unwrap(), config);
        let simulation = Simulation::new(Arc::clone(&state));

        simulation.start().await.unwrap();

        let mut failed = false;
        for _ in 0..100 {
            let live = state.live.lock().await;
            failed = live.events.entries().iter().any(|e| {
                e.level == EventLevel::Error && e.message.starts_with("Simulation error:")
            });
            drop(live);
            if failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(failed, "write failure was not logged");
        assert!(state.simulation.is_running());

        std::fs::remove_dir_all(&blocked).unwrap();

        // The loop backs off, ticks again and the next write lands
        let mut written = Vec::new();
        for _ in 0..100 {
            if let Ok(Some(entries)) = state.history.load() {
                written = entries;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(written.len() >= 2, "history was never written");
        assert!(state.live.lock().await.ticks >= 2);

        let outcome = simulation.stop().await.unwrap();
        assert!(outcome.exited);
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        state
            .live
            .lock()
            .await
            .events
            .push(EventLevel::Info, "kept");

        let simulation = Simulation::new(Arc::clone(&state));
        assert_eq!(simulation.stop().await, Err(ControlError::NotRunning));
        assert_eq!(
            ControlError::NotRunning.to_string(),
            "Simulation not running"
        );

        // Nothing was touched
        assert_eq!(state.live.lock().await.events.len(), 1);
        assert!(!state.history.path().exists());
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let simulation = Simulation::new(Arc::clone(&state));

        simulation.start().await.unwrap();
        assert!(state.simulation.is_running());
        assert!(state.sync.control.is_running());
        assert_eq!(simulation.start().await, Err(ControlError::AlreadyRunning));

        // The first tick runs right away
        for _ in 0..100 {
            if state.live.lock().await.ticks > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.live.lock().await.snapshot.len(), 1);

        let outcome = simulation.stop().await.unwrap();
        assert!(outcome.exited);
        assert!(!state.simulation.is_running());
        assert!(!state.sync.control.is_running());

        let live = state.live.lock().await;
        let messages: Vec<_> = live
            .events
            .entries()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages[0], "Sensor simulation initialized");
        assert!(messages.iter().any(|m| m.starts_with("Simulation stopped")));
        assert!(
            messages
                .iter()
                .any(|m| m.starts_with("Database sync stopped"))
        );
    }

    #[tokio::test]
    async fn test_start_loads_prior_history() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let mut buffer = HistoryBuffer::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..3 {
            tick(&state, &mut buffer, &mut rng, &running())
                .await
                .unwrap();
        }

        let simulation = Simulation::new(Arc::clone(&state));
        simulation.start().await.unwrap();
        for _ in 0..100 {
            if state.live.lock().await.ticks > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        simulation.stop().await.unwrap();

        let on_disk = state.history.load().unwrap().unwrap();
        assert!(on_disk.len() >= 4);
        // Numbering continued after the loaded entries
        assert!(on_disk.windows(2).all(|w| w[0].seq < w[1].seq));

        let live = state.live.lock().await;
        assert!(
            live.events
                .entries()
                .iter()
                .any(|e| e.message == "Loaded 3 existing readings")
        );
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let simulation = Simulation::new(Arc::clone(&state));

        simulation.start().await.unwrap();
        state.sync.set_cursor(3);
        state.live.lock().await.set_active_sensors(4);
        simulation.reset().await;

        assert!(!state.simulation.is_running());
        assert!(!state.sync.control.is_running());
        assert_eq!(state.sync.cursor(), 0);

        let live = state.live.lock().await;
        assert!(live.events.is_empty());
        assert!(live.snapshot.is_empty());
        assert_eq!(live.active_sensors(), 4);
        drop(live);

        assert_eq!(state.history.load().unwrap(), Some(Vec::new()));
    }
}
