//! Testing utilities and mock implementations
//!
//! Lets the connection manager be exercised without a broker: a recording
//! protocol engine plus helpers for draining the notification stream.

pub mod mocks;

pub use mocks::*;

use crate::observability::Notification;
use tokio::sync::broadcast;

/// Collect every notification currently buffered on `rx`
pub fn drain_notifications(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut drained = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(notification) => drained.push(notification),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    drained
}

/// Log messages in order, without timestamps
pub fn log_messages(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(Notification::as_log)
        .map(|event| event.message.clone())
        .collect()
}
