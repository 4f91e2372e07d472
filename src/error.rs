//! Error types for the TLS MQTT connection manager
//!
//! Protocol-level failures reported by the engine are folded into a fixed
//! taxonomy ([`ProtocolError`]) and surfaced as notifications. Credential and
//! engine errors are rendered into log events; none of them reach the caller
//! of a session operation as a returned error.

use std::path::PathBuf;
use thiserror::Error;

/// Raw error signal reported by the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    NoError,
    InvalidProtocolVersion,
    IdRejected,
    ServerUnavailable,
    BadUsernameOrPassword,
    NotAuthorized,
    TransportInvalid,
    ProtocolViolation,
    Unknown,
}

/// Protocol-level errors surfaced through the error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProtocolError {
    #[error("Invalid protocol version")]
    InvalidProtocolVersion,
    #[error("Client ID rejected")]
    ClientIdRejected,
    #[error("Server unavailable")]
    ServerUnavailable,
    #[error("Bad username or password")]
    BadCredentials,
    #[error("Not authorized")]
    NotAuthorized,
    #[error("Transport invalid")]
    TransportInvalid,
    #[error("Protocol violation")]
    ProtocolViolation,
    #[error("Unknown error")]
    UnknownError,
}

impl ProtocolError {
    /// Classify an engine error code; `NoError` yields `None` and is never surfaced
    pub fn from_engine_code(code: EngineErrorCode) -> Option<Self> {
        let error = match code {
            EngineErrorCode::NoError => return None,
            EngineErrorCode::InvalidProtocolVersion => Self::InvalidProtocolVersion,
            EngineErrorCode::IdRejected => Self::ClientIdRejected,
            EngineErrorCode::ServerUnavailable => Self::ServerUnavailable,
            EngineErrorCode::BadUsernameOrPassword => Self::BadCredentials,
            EngineErrorCode::NotAuthorized => Self::NotAuthorized,
            EngineErrorCode::TransportInvalid => Self::TransportInvalid,
            EngineErrorCode::ProtocolViolation => Self::ProtocolViolation,
            EngineErrorCode::Unknown => Self::UnknownError,
        };
        Some(error)
    }
}

/// Failures while reading certificate and key material
///
/// These are soft failures: the loader logs them and continues with whatever
/// material did load.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Could not open CA certificate file: {}", .path.display())]
    CaUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to load CA certificate from: {}", .path.display())]
    CaEmpty { path: PathBuf },
    #[error("Could not open client certificate file: {}", .path.display())]
    ClientCertUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to load client certificate from: {}", .path.display())]
    ClientCertInvalid { path: PathBuf },
    #[error("Could not open private key file: {}", .path.display())]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to load private key from: {} (tried {tried})", .path.display())]
    KeyUnparseable { path: PathBuf, tried: String },
}

/// Errors raised while assembling the rustls client configuration
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Errors returned synchronously by a protocol engine primitive
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No active broker session")]
    NotRunning,
    #[error("No async runtime available to drive the connection")]
    NoRuntime,
    #[error("Request rejected by the protocol engine: {0}")]
    Rejected(String),
}

/// Errors returned by [`crate::session::ClientHandle`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client task is no longer running")]
    Closed,
}
