//! EventBroadcaster - Log ring and live fan-out
//!
//! ## Responsibilities
//!
//! - Bounded in-memory log ring (FIFO eviction)
//! - Push every entry to all connected observers
//! - Catch-up burst (`log_history`) for newly connected observers
//! - Capture result notifications
//!
//! Ring and observer set sit behind one lock, so a subscriber's catch-up
//! burst and its first live entry neither overlap nor leave a gap.
//! Delivery is an unbounded channel send; `emit` never waits on observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default ring capacity
pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One log ring entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Catch-up payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogHistory {
    pub logs: Vec<LogEntry>,
}

/// Messages pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    LogHistory(LogHistory),
    LogMessage(LogEntry),
    CaptureResult(serde_json::Value),
}

struct Inner {
    ring: VecDeque<LogEntry>,
    capacity: usize,
    observers: HashMap<Uuid, mpsc::UnboundedSender<String>>,
}

impl Inner {
    fn push(&mut self, entry: LogEntry) {
        if self.ring.len() >= self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }

    /// Send to every observer, dropping the ones whose receiver is gone
    fn fan_out(&mut self, json: &str) {
        self.observers.retain(|id, tx| match tx.send(json.to_string()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(connection_id = %id, "Dropping closed observer");
                false
            }
        });
    }
}

/// EventBroadcaster instance
pub struct EventBroadcaster {
    inner: Mutex<Inner>,
}

impl EventBroadcaster {
    /// Create new EventBroadcaster holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                observers: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-push leaves the ring structurally valid
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the ring and push to all observers
    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Debug => tracing::debug!(target: "events", "{}", entry.message),
            LogLevel::Info => tracing::info!(target: "events", "{}", entry.message),
            LogLevel::Warning => tracing::warn!(target: "events", "{}", entry.message),
            LogLevel::Error => tracing::error!(target: "events", "{}", entry.message),
        }

        let json = match serde_json::to_string(&HubMessage::LogMessage(entry.clone())) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let mut inner = self.lock();
        inner.push(entry);
        inner.fan_out(&json);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }

    /// Push a capture result to observers (not stored in the ring)
    pub fn broadcast_capture(&self, result: serde_json::Value) {
        let json = match serde_json::to_string(&HubMessage::CaptureResult(result)) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };
        let mut inner = self.lock();
        tracing::debug!(client_count = inner.observers.len(), "Broadcasting capture result");
        inner.fan_out(&json);
    }

    /// Register an observer; the receiver already holds the catch-up burst
    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.lock();
        let history = HubMessage::LogHistory(LogHistory {
            logs: inner.ring.iter().cloned().collect(),
        });
        match serde_json::to_string(&history) {
            Ok(json) => {
                let _ = tx.send(json);
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize log history"),
        }
        inner.observers.insert(id, tx);
        drop(inner);

        tracing::info!(connection_id = %id, "Client connected");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        if self.lock().observers.remove(id).is_some() {
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Current ring contents, oldest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().ring.iter().cloned().collect()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
