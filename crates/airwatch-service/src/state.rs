//! Application state shared across handlers and background tasks.
//!
//! # Broadcast Channel Behavior
//!
//! The `snapshots_tx` broadcast channel carries every simulation batch to
//! WebSocket clients:
//!
//! - **Buffer size**: Configurable via `server.broadcast_buffer` (default: 100)
//! - **Message loss**: If a subscriber falls behind and the buffer fills, old messages are dropped
//! - **No blocking**: Senders never block; they succeed or drop messages for slow receivers
//!
//! # Task control
//!
//! The simulation loop and the sync bridge each own a [`TaskControl`]. Every
//! start opens a new run generation; stopping bumps the generation, which
//! wakes the task's [`StopSignal`] immediately, even mid-sleep. A task left
//! over from an earlier run (one that missed its stop timeout) still sees
//! its own generation end and exits on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify, RwLock, broadcast, watch};
use tokio::task::JoinHandle;

use airwatch_store::Store;
use airwatch_types::{RawReading, clamp_sensor_count};

use crate::config::Config;
use crate::events::{EventLevel, EventLog};
use crate::history::HistoryFile;

/// Shared application state.
pub struct AppState {
    /// The data store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// The history buffer file.
    pub history: HistoryFile,
    /// Live simulation data: sensor count, latest batch and event log.
    pub live: Mutex<LiveData>,
    /// Broadcast channel for simulation batches.
    pub snapshots_tx: broadcast::Sender<SnapshotEvent>,
    /// Simulation loop control.
    pub simulation: TaskControl,
    /// Sync bridge control and progress.
    pub sync: SyncState,
}

impl AppState {
    /// Create new application state.
    ///
    /// The broadcast channel buffer size is determined by `config.server.broadcast_buffer`.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let (snapshots_tx, _) = broadcast::channel(config.server.broadcast_buffer.max(1));
        let history = HistoryFile::new(config.storage.history_file());
        let live = LiveData::new(
            config.simulation.initial_sensors,
            config.simulation.event_log_capacity,
        );

        Arc::new(Self {
            store: Mutex::new(store),
            config: RwLock::new(config),
            history,
            live: Mutex::new(live),
            snapshots_tx,
            simulation: TaskControl::new(),
            sync: SyncState::new(),
        })
    }

    /// Record a dashboard event and mirror it to the tracing log.
    pub async fn log_event(&self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            EventLevel::Error => tracing::error!("{}", message),
            EventLevel::Debug | EventLevel::Data => tracing::debug!("{}", message),
            _ => tracing::info!("{}", message),
        }
        self.live.lock().await.events.push(level, message);
    }
}

/// Mutable simulation data guarded by a single mutex.
#[derive(Debug)]
pub struct LiveData {
    /// Number of roster sensors simulated per tick, always in `1..=10`.
    active_sensors: usize,
    /// The most recent batch.
    pub snapshot: Vec<RawReading>,
    pub events: EventLog,
    /// Ticks completed since the last start.
    pub ticks: u64,
    /// Entries in the history buffer after the last write.
    pub history_len: usize,
}

impl LiveData {
    pub fn new(active_sensors: usize, event_capacity: usize) -> Self {
        Self {
            active_sensors: clamp_sensor_count(active_sensors),
            snapshot: Vec::new(),
            events: EventLog::new(event_capacity),
            ticks: 0,
            history_len: 0,
        }
    }

    pub fn active_sensors(&self) -> usize {
        self.active_sensors
    }

    /// Set the active sensor count, clamped into range. Returns the applied value.
    pub fn set_active_sensors(&mut self, count: usize) -> usize {
        self.active_sensors = clamp_sensor_count(count);
        self.active_sensors
    }
}

/// A simulation batch for WebSocket broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEvent {
    /// Tick counter of the batch.
    pub tick: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub readings: Vec<RawReading>,
}

/// Start/stop bookkeeping for one background task.
pub struct TaskControl {
    /// Whether the task is currently running.
    running: AtomicBool,
    /// When the task was started (Unix timestamp).
    started_at: AtomicU64,
    /// Current run generation; bumped on every start and stop.
    generation: watch::Sender<u64>,
    /// Handle of the most recently spawned task.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskControl {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            generation,
            handle: Mutex::new(None),
        }
    }

    /// Check if the task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the task for a new run.
    ///
    /// Returns `None` if it is already running; otherwise marks it running
    /// and returns the stop signal for the new run.
    pub fn begin(&self) -> Option<StopSignal> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        self.started_at.store(now, Ordering::SeqCst);

        self.generation.send_modify(|g| *g += 1);
        let rx = self.generation.subscribe();
        let generation = *rx.borrow();
        Some(StopSignal { rx, generation })
    }

    /// Remember the handle of the task spawned for the current run.
    pub async fn attach(&self, handle: JoinHandle<()>) {
        *self.handle.lock().await = Some(handle);
    }

    /// Get the task start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        if !self.is_running() {
            return None;
        }
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Signal the current run to stop.
    pub fn signal_stop(&self) {
        self.generation.send_modify(|g| *g += 1);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the current run's task to exit.
    ///
    /// Returns `true` if it exited (or none was attached). A task that
    /// outlives the timeout is left to finish on its own.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => tokio::time::timeout(timeout, handle).await.is_ok(),
            None => true,
        }
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop signal handed to a background task for one run.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl StopSignal {
    /// Whether this run has been told to stop.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() != self.generation
    }

    /// Resolve once this run has been told to stop.
    pub async fn stopped(&mut self) {
        let generation = self.generation;
        // A closed channel means the state is gone; treat it as a stop.
        let _ = self.rx.wait_for(|g| *g != generation).await;
    }
}

/// Sync bridge control and progress counters.
pub struct SyncState {
    pub control: TaskControl,
    /// `seq` of the last history entry persisted.
    cursor: AtomicU64,
    /// Readings created by sync passes since the last start or reset.
    total_synced: AtomicU64,
    /// When the last sync pass finished (Unix timestamp, 0 = never).
    last_sync_at: AtomicU64,
    /// Raised after every history write.
    pub history_written: Notify,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            control: TaskControl::new(),
            cursor: AtomicU64::new(0),
            total_synced: AtomicU64::new(0),
            last_sync_at: AtomicU64::new(0),
            history_written: Notify::new(),
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub(crate) fn set_cursor(&self, cursor: u64) {
        self.cursor.store(cursor, Ordering::SeqCst);
    }

    pub fn total_synced(&self) -> u64 {
        self.total_synced.load(Ordering::SeqCst)
    }

    /// Add `created` to the running total and return the new total.
    pub(crate) fn add_synced(&self, created: u64) -> u64 {
        self.total_synced.fetch_add(created, Ordering::SeqCst) + created
    }

    pub(crate) fn mark_synced_now(&self) {
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        self.last_sync_at.store(now, Ordering::SeqCst);
    }

    pub fn last_sync_at(&self) -> Option<OffsetDateTime> {
        match self.last_sync_at.load(Ordering::SeqCst) {
            0 => None,
            ts => OffsetDateTime::from_unix_timestamp(ts as i64).ok(),
        }
    }

    /// Forget all progress: cursor and total back to zero.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
        self.total_synced.store(0, Ordering::SeqCst);
        self.last_sync_at.store(0, Ordering::SeqCst);
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> Arc<AppState> {
        let dir = std::env::temp_dir().join("airwatch-state-tests");
        let mut config = Config::default();
        config.storage.history_path = Some(dir.join("unused.json"));
        AppState::new(Store::open_in_memory().unwrap(), config)
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = test_state();

        let config = state.config.read().await;
        assert_eq!(config.server.bind, "127.0.0.1:8080");

        let live = state.live.lock().await;
        assert_eq!(live.active_sensors(), 1);
        assert!(live.snapshot.is_empty());
        assert!(!state.simulation.is_running());
        assert!(!state.sync.control.is_running());
    }

    #[test]
    fn test_live_data_clamps_sensor_count() {
        let mut live = LiveData::new(0, 10);
        assert_eq!(live.active_sensors(), 1);
        assert_eq!(live.set_active_sensors(25), 10);
        assert_eq!(live.set_active_sensors(3), 3);
    }

    #[test]
    fn test_task_control_begin_once() {
        let control = TaskControl::new();
        assert!(!control.is_running());
        assert!(control.started_at().is_none());

        let signal = control.begin().unwrap();
        assert!(control.is_running());
        assert!(control.started_at().is_some());
        assert!(!signal.is_stopped());
        assert!(control.begin().is_none());

        control.signal_stop();
        assert!(!control.is_running());
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_old_run_stays_stopped_after_restart() {
        let control = TaskControl::new();
        let first = control.begin().unwrap();
        control.signal_stop();

        let second = control.begin().unwrap();
        assert!(first.is_stopped());
        assert!(!second.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiter() {
        let control = Arc::new(TaskControl::new());
        let mut signal = control.begin().unwrap();

        let waiter = tokio::spawn(async move { signal.stopped().await });
        control.signal_stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_exit() {
        let control = TaskControl::new();
        assert!(control.wait_for_exit(Duration::from_millis(10)).await);

        let mut signal = control.begin().unwrap();
        control
            .attach(tokio::spawn(async move { signal.stopped().await }))
            .await;
        control.signal_stop();
        assert!(control.wait_for_exit(Duration::from_secs(1)).await);

        // A task ignoring its signal times out but is not aborted
        control.begin().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        control
            .attach(tokio::spawn(async move {
                let _ = rx.await;
            }))
            .await;
        control.signal_stop();
        assert!(!control.wait_for_exit(Duration::from_millis(20)).await);
        assert!(tx.send(()).is_ok(), "task should still be alive");
    }

    #[test]
    fn test_sync_state_counters() {
        let sync = SyncState::new();
        sync.set_cursor(7);
        assert_eq!(sync.add_synced(3), 3);
        assert_eq!(sync.add_synced(2), 5);
        sync.mark_synced_now();
        assert!(sync.last_sync_at().is_some());

        sync.reset();
        assert_eq!(sync.cursor(), 0);
        assert_eq!(sync.total_synced(), 0);
        assert!(sync.last_sync_at().is_none());
    }

    #[tokio::test]
    async fn test_app_state_broadcast_channel() {
        let state = test_state();
        let mut rx = state.snapshots_tx.subscribe();

        state
            .snapshots_tx
            .send(SnapshotEvent {
                tick: 1,
                timestamp: OffsetDateTime::now_utc(),
                readings: Vec::new(),
            })
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.tick, 1);
    }

    #[tokio::test]
    async fn test_log_event() {
        let state = test_state();
        state.log_event(EventLevel::System, "hello").await;
        let live = state.live.lock().await;
        assert_eq!(live.events.len(), 1);
        assert_eq!(live.events.entries()[0].message, "hello");
    }
}
