//! Active subscription registry and topic filter matching
//!
//! Handles only live for one broker session: the state machine clears the
//! registry whenever the connection drops, and callers re-subscribe after
//! the next connect.

use crate::transport::{QoS, SubscriptionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub topic_filter: String,
    pub qos: QoS,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handles: Vec<SubscriptionHandle>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle; a previous handle for the same filter is returned
    pub fn insert(&mut self, handle: SubscriptionHandle) -> Option<SubscriptionHandle> {
        let replaced = self.remove(&handle.topic_filter);
        self.handles.push(handle);
        replaced
    }

    pub fn remove(&mut self, topic_filter: &str) -> Option<SubscriptionHandle> {
        let index = self
            .handles
            .iter()
            .position(|h| h.topic_filter == topic_filter)?;
        Some(self.handles.remove(index))
    }

    /// Drop every handle, returning how many were live
    pub fn clear(&mut self) -> usize {
        let count = self.handles.len();
        self.handles.clear();
        count
    }

    pub fn get(&self, topic_filter: &str) -> Option<&SubscriptionHandle> {
        self.handles.iter().find(|h| h.topic_filter == topic_filter)
    }

    /// First handle whose filter matches a concrete topic
    pub fn route(&self, topic: &str) -> Option<&SubscriptionHandle> {
        self.handles
            .iter()
            .find(|h| topic_matches(&h.topic_filter, topic))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionHandle> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
///
/// Topics starting with `$` are not matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
