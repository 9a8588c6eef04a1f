//! Sensor simulator, sync bridge, AQI forecast and HTTP REST API for
//! air-quality dashboards.
//!
//! This crate provides a service that:
//! - Simulates a roster of air-quality sensors on a fixed tick
//! - Buffers the readings in an on-disk history file
//! - Copies new history into the local database in the background
//! - Forecasts AQI from stored readings
//! - Exposes a REST API and a WebSocket stream of live batches
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `POST /api/simulation/{start,stop,reset}` - Simulation control
//! - `GET /api/simulation/status` - Simulation and sync status
//! - `PUT /api/simulation/sensor-count` - Number of simulated sensors
//! - `GET /api/simulation/{snapshot,history,logs,debug}` - Live data
//! - `POST /api/sync` - Sync the history file now
//! - `GET /api/sensors` - Active sensors with their latest reading
//! - `GET /api/sensors/{id}/readings` - Recent readings of a sensor
//! - `GET /api/sensors/{id}/forecast` - 24 hour AQI forecast
//! - `GET /api/readings` - Query readings
//! - `POST /api/readings/ingest` - Store a reading from a gateway
//! - `GET|POST /api/posts` - Blog posts
//! - `WS /api/ws` - Live simulation batches
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/airwatch/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/airwatch/data.db"
//!
//! [simulation]
//! tick_interval_ms = 3000
//! max_history = 1000
//!
//! [sync]
//! interval_ms = 60000
//! ```

pub mod api;
pub mod config;
pub mod events;
pub mod forecast;
pub mod history;
pub mod simulator;
pub mod state;
pub mod sync;
pub mod ws;

pub use config::{
    Config, ConfigError, ForecastConfig, ServerConfig, SimulationConfig, StorageConfig, SyncConfig,
};
pub use events::{EventEntry, EventLevel, EventLog};
pub use forecast::{Forecast, ForecastError, Trend};
pub use history::{HistoryBuffer, HistoryError, HistoryFile};
pub use simulator::{ControlError, Simulation};
pub use state::{AppState, SnapshotEvent};
pub use sync::{SyncError, SyncReport};
