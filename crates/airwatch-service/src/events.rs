//! In-memory event log shown on the simulation dashboard.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

/// Severity of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    System,
    Info,
    Data,
    Success,
    Debug,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::System => "SYSTEM",
            EventLevel::Info => "INFO",
            EventLevel::Data => "DATA",
            EventLevel::Success => "SUCCESS",
            EventLevel::Debug => "DEBUG",
            EventLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEntry {
    /// Wall-clock time of the event as `HH:MM:SS`.
    pub timestamp: String,
    pub level: EventLevel,
    pub message: String,
}

/// Bounded log keeping the most recent entries.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<EventEntry>,
    capacity: usize,
}

impl EventLog {
    /// Create an empty log keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry stamped with the current time, dropping the oldest when full.
    pub fn push(&mut self, level: EventLevel, message: impl Into<String>) {
        self.push_at(level, message, OffsetDateTime::now_utc());
    }

    pub(crate) fn push_at(
        &mut self,
        level: EventLevel,
        message: impl Into<String>,
        at: OffsetDateTime,
    ) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(EventEntry {
            timestamp: clock_time(at),
            level,
            message: message.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first.
    pub fn entries(&self) -> Vec<EventEntry> {
        self.entries.iter().cloned().collect()
    }
}

fn clock_time(at: OffsetDateTime) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    at.format(&format).unwrap_or_default()
}
