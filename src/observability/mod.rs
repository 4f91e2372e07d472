//! Observability for the connection manager
//!
//! `events` carries the front-end facing notification stream; `logging`
//! installs the tracing subscriber that also receives every mirrored log line.

pub mod events;
pub mod logging;

pub use events::{EventSink, LogEvent, Notification, DEFAULT_NOTIFICATION_CAPACITY};
pub use logging::{init_default_logging, init_logging, LogFormat, EVENTS_TARGET};
