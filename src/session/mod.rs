//! Connection session management
//!
//! The state machine owns connection lifecycle, reconnect scheduling and the
//! subscription registry; the client module runs it on a tokio task behind a
//! cloneable handle.

pub mod client;
pub mod reconnect;
pub mod state_machine;
pub mod subscriptions;

pub use client::{ClientHandle, MqttTlsClient, COMMAND_CHANNEL_CAPACITY, ENGINE_EVENT_CAPACITY};
pub use reconnect::{ReconnectPolicy, ReconnectScheduler, ReconnectTicket, ReconnectionDecision};
pub use state_machine::{Command, ConnectionState, ConnectionStateMachine, Input};
pub use subscriptions::{topic_matches, SubscriptionHandle, SubscriptionRegistry};
