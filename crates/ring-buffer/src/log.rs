//! Adapter traffic log

use crate::buffer::{RingBuffer, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a log line records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Command written to the adapter
    Sent,
    /// Line read from the adapter
    Received,
    /// Transport or protocol failure
    Error,
    /// Lifecycle note (connect, disconnect, init)
    Info,
}

impl LogKind {
    /// Console prefix for the line
    pub fn prefix(&self) -> &'static str {
        match self {
            LogKind::Sent => ">> ",
            LogKind::Received => "<< ",
            LogKind::Error => "!! ",
            LogKind::Info => "-- ",
        }
    }
}

/// One diagnostic log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub kind: LogKind,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.text)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded log of raw adapter traffic for a debug console
pub struct DiagnosticLog {
    entries: RingBuffer<LogEntry>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RingBuffer::new(capacity),
        }
    }

    /// Append a line, evicting the oldest when full
    pub fn record(&self, kind: LogKind, text: impl Into<String>) {
        self.entries.push(LogEntry {
            timestamp_ms: now_ms(),
            kind,
            text: text.into(),
        });
    }

    /// Entries, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.snapshot()
    }

    /// Prefixed lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.snapshot().iter().map(ToString::to_string).collect()
    }

    /// Plain-text export, one entry per line with its timestamp
    pub fn export_text(&self) -> String {
        self.snapshot()
            .iter()
            .map(|entry| format!("[{}] {}\n", entry.timestamp_ms, entry))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
