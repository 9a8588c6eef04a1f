//! The on-disk history buffer shared by the simulation loop and the sync bridge.
//!
//! The file holds a JSON array of raw reading objects, rewritten wholesale on
//! every tick through a temporary file and a rename, so readers never observe
//! a half-written array. Each record carries a `seq` number that increases
//! monotonically across the life of the file; records written before `seq`
//! existed are numbered by their 1-based position when loaded.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use airwatch_types::RawReading;

/// Errors reading or writing the history file.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("History file {path} is not a JSON array of records: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to encode history record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One record of the history file together with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub seq: u64,
    /// The record exactly as stored; it may not be a valid reading.
    pub record: Value,
}

impl HistoryEntry {
    fn from_record(position: usize, record: Value) -> Self {
        let seq = record
            .get("seq")
            .and_then(Value::as_u64)
            .unwrap_or(position as u64 + 1);
        Self { seq, record }
    }

    /// Stable sensor id of the record, if present.
    pub fn sensor_name(&self) -> Option<&str> {
        self.record.get("name").and_then(Value::as_str)
    }
}

/// Location of the history file.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read all entries. Returns `Ok(None)` when the file does not exist;
    /// an empty file reads as no entries.
    pub fn load(&self) -> Result<Option<Vec<HistoryEntry>>, HistoryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }

        let records: Vec<Value> =
            serde_json::from_str(&content).map_err(|source| HistoryError::Parse {
                path: self.path.clone(),
                source,
            })?;

        Ok(Some(
            records
                .into_iter()
                .enumerate()
                .map(|(i, record)| HistoryEntry::from_record(i, record))
                .collect(),
        ))
    }

    /// Replace the file contents with `entries`.
    pub fn write(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let records: Vec<&Value> = entries.iter().map(|e| &e.record).collect();
        let bytes = serde_json::to_vec_pretty(&records).map_err(HistoryError::Encode)?;

        let temp = self.temp_path();
        std::fs::write(&temp, bytes).map_err(|e| self.io_error(e))?;
        std::fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(
            "Wrote {} history records to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Truncate the file to an empty array.
    pub fn clear(&self) -> Result<(), HistoryError> {
        self.write(&[])
    }

    /// Inspect the file and its directory without modifying the history.
    pub fn diagnostics(&self) -> HistoryDiagnostics {
        let mut diag = HistoryDiagnostics {
            path: self.path.display().to_string(),
            exists: self.path.exists(),
            size_bytes: 0,
            readable: false,
            record_count: 0,
            read_error: None,
            directory_writable: false,
            write_error: None,
        };

        if diag.exists {
            diag.size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
            match self.load() {
                Ok(entries) => {
                    diag.readable = true;
                    diag.record_count = entries.map_or(0, |e| e.len());
                }
                Err(e) => diag.read_error = Some(e.to_string()),
            }
        }

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let marker = dir.join(".write_test");
        match std::fs::write(&marker, b"test").and_then(|_| std::fs::remove_file(&marker)) {
            Ok(()) => diag.directory_writable = true,
            Err(e) => diag.write_error = Some(e.to_string()),
        }

        diag
    }
}

/// Result of [`HistoryFile::diagnostics`].
#[derive(Debug, Clone, Serialize)]
pub struct HistoryDiagnostics {
    pub path: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub readable: bool,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    pub directory_writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error: Option<String>,
}

/// The simulation loop's in-memory copy of the history.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    entries: Vec<HistoryEntry>,
    next_seq: u64,
}

impl HistoryBuffer {
    /// Continue numbering after the highest `seq` already present.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        let next_seq = entries.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
        Self { entries, next_seq }
    }

    /// Reserve the next sequence number.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq.max(1);
        self.next_seq = seq + 1;
        seq
    }

    /// Append a reading; its `seq` must come from [`HistoryBuffer::next_seq`].
    pub fn push(&mut self, reading: &RawReading) -> Result<(), HistoryError> {
        let record = serde_json::to_value(reading).map_err(HistoryError::Encode)?;
        self.entries.push(HistoryEntry {
            seq: reading.seq,
            record,
        });
        Ok(())
    }

    /// Keep only the newest `max` entries. Returns how many were dropped.
    pub fn trim(&mut self, max: usize) -> usize {
        let excess = self.entries.len().saturating_sub(max);
        if excess > 0 {
            self.entries.drain(..excess);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}
