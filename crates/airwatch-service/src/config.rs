//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use airwatch_types::MAX_ACTIVE_SENSORS;

/// File name of the history buffer when no explicit path is configured.
pub const HISTORY_FILE_NAME: &str = "sensor_data.json";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Simulation loop settings.
    pub simulation: SimulationConfig,
    /// Sync bridge settings.
    pub sync: SyncConfig,
    /// Forecast settings.
    pub forecast: ForecastConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage path is not empty
    /// - Ticks are at least a second apart and other intervals are non-zero
    /// - The initial sensor count is within the roster
    /// - The forecast lookback and offset are in range
    ///
    /// # Example
    ///
    /// ```
    /// use airwatch_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.simulation.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.forecast.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Snapshot broadcast buffer for WebSocket subscribers.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_buffer: 100,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                )),
                Some((_, port)) => match port.parse::<u16>() {
                    Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                    Err(_) => errors.push(ValidationError::new(
                        "server.bind",
                        format!("invalid port '{}': must be a number 1-65535", port),
                    )),
                    Ok(_) => {}
                },
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError::new(
                "server.broadcast_buffer",
                "broadcast buffer must be at least 1",
            ));
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// History buffer file; defaults to `sensor_data.json` next to the database.
    pub history_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: airwatch_store::default_db_path(),
            history_path: None,
        }
    }
}

impl StorageConfig {
    /// Resolved location of the history buffer file.
    pub fn history_file(&self) -> PathBuf {
        match &self.history_path {
            Some(path) => path.clone(),
            None => self
                .path
                .parent()
                .map(|dir| dir.join(HISTORY_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(HISTORY_FILE_NAME)),
        }
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        if let Some(history) = &self.history_path
            && history.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "storage.history_path",
                "history path cannot be empty (omit it to use the default)",
            ));
        }

        errors
    }
}

/// Shortest accepted tick interval, in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 1_000;

/// Simulation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// Delay after a failed tick, in milliseconds.
    pub error_backoff_ms: u64,
    /// Maximum number of entries kept in the history file.
    pub max_history: usize,
    /// Active sensor count at startup.
    pub initial_sensors: usize,
    /// How long a stop request waits for the loop to exit, in milliseconds.
    pub stop_timeout_ms: u64,
    /// Number of event log entries kept in memory.
    pub event_log_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3_000,
            error_backoff_ms: 1_000,
            max_history: 1_000,
            initial_sensors: 1,
            stop_timeout_ms: 2_000,
            event_log_capacity: 200,
        }
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate simulation configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // Reading timestamps have second precision; faster ticks collide
        if self.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            errors.push(ValidationError::new(
                "simulation.tick_interval_ms",
                format!(
                    "tick interval {} ms is too short (minimum {} ms)",
                    self.tick_interval_ms, MIN_TICK_INTERVAL_MS
                ),
            ));
        }
        if self.error_backoff_ms == 0 {
            errors.push(ValidationError::new(
                "simulation.error_backoff_ms",
                "error backoff must be greater than 0",
            ));
        }
        if self.max_history == 0 {
            errors.push(ValidationError::new(
                "simulation.max_history",
                "history must keep at least one entry",
            ));
        }
        if !(1..=MAX_ACTIVE_SENSORS).contains(&self.initial_sensors) {
            errors.push(ValidationError::new(
                "simulation.initial_sensors",
                format!(
                    "initial sensor count {} is out of range (1-{})",
                    self.initial_sensors, MAX_ACTIVE_SENSORS
                ),
            ));
        }
        if self.event_log_capacity == 0 {
            errors.push(ValidationError::new(
                "simulation.event_log_capacity",
                "event log must keep at least one entry",
            ));
        }

        errors
    }
}

/// Sync bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum delay between sync passes, in milliseconds.
    pub interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.interval_ms == 0 {
            errors.push(ValidationError::new(
                "sync.interval_ms",
                "sync interval must be greater than 0",
            ));
        }
        errors
    }
}

/// Longest accepted forecast lookback, in hours (one year).
pub const MAX_LOOKBACK_HOURS: u32 = 8760;

/// Largest accepted UTC offset, in minutes (18 hours).
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Forecast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// How far back readings are considered, in hours.
    pub lookback_hours: u32,
    /// Offset of the local clock from UTC, used for commute hours.
    pub utc_offset_minutes: i32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 48,
            utc_offset_minutes: 0,
        }
    }
}

impl ForecastConfig {
    /// Validate forecast configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.lookback_hours) {
            errors.push(ValidationError::new(
                "forecast.lookback_hours",
                format!(
                    "lookback {} is out of range (1-{} hours)",
                    self.lookback_hours, MAX_LOOKBACK_HOURS
                ),
            ));
        }
        if self.utc_offset_minutes.abs() >= MAX_UTC_OFFSET_MINUTES {
            errors.push(ValidationError::new(
                "forecast.utc_offset_minutes",
                format!(
                    "UTC offset {} is out of range (must be within +/-{} minutes)",
                    self.utc_offset_minutes, MAX_UTC_OFFSET_MINUTES
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `simulation.max_history`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airwatch")
        .join("server.toml")
}
