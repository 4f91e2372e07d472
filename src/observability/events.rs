//! Observable event stream
//!
//! Everything the connection manager wants a front-end to see travels as a
//! [`Notification`] over a broadcast channel. Log lines are timestamped
//! [`LogEvent`]s and are mirrored to `tracing` as they are emitted.

use crate::config::ConfigField;
use crate::observability::logging::EVENTS_TARGET;
use crate::session::ConnectionState;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Capacity of the notification channel; slow receivers see `Lagged`
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// A single timestamped log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Connected,
    Disconnected,
    StateChanged { state: ConnectionState },
    ConnectedChanged { connected: bool },
    MessageReceived { topic: String, payload: String },
    Error { message: String },
    Log(LogEvent),
    ConfigChanged { field: ConfigField },
}

impl Notification {
    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            Notification::Log(event) => Some(event),
            _ => None,
        }
    }
}

/// Sending half of the notification stream
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<Notification>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Emit a notification; having no receivers is not an error
    pub fn emit(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }

    pub fn log(&self, message: impl Into<String>) {
        let event = LogEvent::new(message);
        info!(target: EVENTS_TARGET, "{}", event.message);
        self.emit(Notification::Log(event));
    }

    /// Same as [`EventSink::log`] but mirrored to tracing at WARN
    pub fn warn(&self, message: impl Into<String>) {
        let event = LogEvent::new(message);
        warn!(target: EVENTS_TARGET, "{}", event.message);
        self.emit(Notification::Log(event));
    }
}
