//! In-process ring buffer backing `GET /admin/system-logs` (`§4.6`, `§9`).
//!
//! Deliberately process-scoped and bounded: a fresh replica boots empty and
//! warms on traffic, matching the design note that no cross-replica
//! recovery is required for this kind of global mutable state.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

const CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub ts: DateTime<Utc>,
}

pub struct SystemLog {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl SystemLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    fn push(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(%message, "system log"),
            LogLevel::Warn => tracing::warn!(%message, "system log"),
            LogLevel::Error => tracing::error!(%message, "system log"),
        }
        let mut entries = self.entries.lock();
        if entries.len() == CAPACITY {
            entries.pop_back();
        }
        entries.push_front(LogEntry {
            level,
            message,
            ts: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    /// Newest first, per `§4.6`.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for SystemLog {
    fn default() -> Self {
        Self::new()
    }
}
