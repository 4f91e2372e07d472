//! Protocol engine abstraction
//!
//! The connection state machine drives an MQTT protocol engine through the
//! [`ProtocolEngine`] trait. Primitives return immediately; the outcome of a
//! connect or disconnect arrives later as an [`EngineEvent`] on a channel,
//! tagged with the attempt [`Generation`] it belongs to.

use crate::error::{EngineError, EngineErrorCode};
use crate::tls::TlsContext;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

pub mod mqtt;

/// Monotonic connection attempt counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery guarantee level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(other),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the engine needs for one encrypted connect
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub generation: Generation,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub tls: TlsContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    Connected,
    Disconnected,
    Error(EngineErrorCode),
    Message { topic: String, payload: Bytes },
    /// Keep-alive answer from the broker
    PingResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub generation: Generation,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(generation: Generation, kind: EngineEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Engine-side identifier for an accepted subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Primitives exposed by an MQTT protocol engine
///
/// Implementations must not block. Connection results are reported through
/// the engine's event channel, never through these return values.
pub trait ProtocolEngine: Send {
    /// Start an encrypted connection attempt, replacing any previous one
    fn connect_encrypted(&mut self, request: ConnectRequest) -> Result<(), EngineError>;

    /// Request a graceful disconnect of the live session
    fn disconnect(&mut self) -> Result<(), EngineError>;

    /// Drop the current attempt without a protocol-level goodbye
    fn abort(&mut self);

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<SubscriptionId, EngineError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<(), EngineError>;

    fn publish(&mut self, topic: &str, payload: Bytes, qos: QoS, retain: bool)
        -> Result<(), EngineError>;
}
