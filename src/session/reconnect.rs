//! Single-shot reconnect scheduling
//!
//! At most one reconnect is pending at any time. Every arm or cancel bumps an
//! epoch counter, and a timer that fires with a ticket from an older epoch is
//! ignored, so a stale expiry can never start a second concurrent attempt.

use crate::config::{ReconnectSection, DEFAULT_RECONNECT_INTERVAL_MS};
use crate::session::ConnectionState;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Fixed delay; there is no backoff and no attempt cap
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

impl From<&ReconnectSection> for ReconnectPolicy {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            enabled: section.enabled,
            interval: section.interval(),
        }
    }
}

/// Handle for one armed reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTicket {
    epoch: u64,
    pub due: Instant,
}

impl ReconnectTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Outcome of asking whether a reconnect may happen now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed,
    AbortUserDisconnected,
    AbortDisabled,
    AbortNotDisconnected,
}

#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    epoch: u64,
    pending: Option<ReconnectTicket>,
    armed_total: u64,
}

impl ReconnectScheduler {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            epoch: 0,
            pending: None,
            armed_total: 0,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Disabling also drops any pending reconnect
    pub fn set_enabled(&mut self, enabled: bool) {
        self.policy.enabled = enabled;
        if !enabled {
            self.cancel();
        }
    }

    pub fn decide(&self, state: ConnectionState, user_disconnected: bool) -> ReconnectionDecision {
        if user_disconnected {
            ReconnectionDecision::AbortUserDisconnected
        } else if !self.policy.enabled {
            ReconnectionDecision::AbortDisabled
        } else if state != ConnectionState::Disconnected {
            ReconnectionDecision::AbortNotDisconnected
        } else {
            ReconnectionDecision::Proceed
        }
    }

    /// Arm a reconnect one interval from now, replacing any pending one
    pub fn arm(&mut self) -> ReconnectTicket {
        self.epoch += 1;
        self.armed_total += 1;
        let ticket = ReconnectTicket {
            epoch: self.epoch,
            due: Instant::now() + self.policy.interval,
        };
        self.pending = Some(ticket);
        ticket
    }

    /// Returns true if a pending reconnect was dropped
    pub fn cancel(&mut self) -> bool {
        self.epoch += 1;
        self.pending.take().is_some()
    }

    pub fn pending(&self) -> Option<ReconnectTicket> {
        self.pending
    }

    /// Consume `ticket` if it is the one currently pending
    pub fn fire(&mut self, ticket: ReconnectTicket) -> bool {
        if self.pending == Some(ticket) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Number of times a reconnect has been armed
    pub fn armed_total(&self) -> u64 {
        self.armed_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.interval, Duration::from_millis(5000));

        let section = ReconnectSection {
            enabled: false,
            interval_ms: 250,
        };
        let policy = ReconnectPolicy::from(&section);
        assert!(!policy.enabled);
        assert_eq!(policy.interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_arm_replaces_pending_ticket() {
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());
        let first = scheduler.arm();
        let second = scheduler.arm();

        assert_ne!(first, second);
        assert_eq!(scheduler.pending(), Some(second));
        assert!(!scheduler.fire(first), "stale ticket must not fire");
        assert!(scheduler.fire(second));
        assert!(!scheduler.fire(second), "ticket fires only once");
        assert_eq!(scheduler.armed_total(), 2);
    }

    #[tokio::test]
    async fn test_cancel_invalidates_ticket() {
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());
        let ticket = scheduler.arm();

        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        assert_eq!(scheduler.pending(), None);
        assert!(!scheduler.fire(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_due_after_interval() {
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy {
            enabled: true,
            interval: Duration::from_millis(1500),
        });
        let before = Instant::now();
        let ticket = scheduler.arm();
        assert_eq!(ticket.due - before, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_disabling_drops_pending() {
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());
        scheduler.arm();
        scheduler.set_enabled(false);
        assert_eq!(scheduler.pending(), None);
        assert!(!scheduler.policy().enabled);
    }

    #[test]
    fn test_decide() {
        let mut scheduler = ReconnectScheduler::new(ReconnectPolicy::default());
        assert_eq!(
            scheduler.decide(ConnectionState::Disconnected, false),
            ReconnectionDecision::Proceed
        );
        assert_eq!(
            scheduler.decide(ConnectionState::Disconnected, true),
            ReconnectionDecision::AbortUserDisconnected
        );
        assert_eq!(
            scheduler.decide(ConnectionState::Connecting, false),
            ReconnectionDecision::AbortNotDisconnected
        );

        scheduler.set_enabled(false);
        assert_eq!(
            scheduler.decide(ConnectionState::Disconnected, false),
            ReconnectionDecision::AbortDisabled
        );
    }
}
