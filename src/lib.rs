//! mqttls - TLS-only MQTT connection manager
//!
//! Maintains a single encrypted MQTT session to a broker, with automatic
//! reconnection and mutual-TLS credential loading.
//!
//! # Overview
//!
//! - Credential loading (CA bundle, client certificate, private key probing)
//! - Cipher policy and per-attempt rustls context assembly
//! - A connection state machine with a fixed-interval reconnect scheduler
//! - Subscribe, unsubscribe and publish gated on the connected state
//! - An observable stream of timestamped log lines and state notifications
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqttls::{ClientSettings, ConnectionConfig, MqttTlsClient, Notification};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ClientSettings {
//!     broker: ConnectionConfig::from_broker_url("mqtts://broker.example.com:8883")?
//!         .with_ca_cert_path("/etc/mqttls/ca.pem"),
//!     ..Default::default()
//! };
//!
//! let (client, _task) = MqttTlsClient::spawn_rumqtt(settings);
//! let mut notifications = client.notifications();
//! client.connect().await?;
//!
//! while let Ok(notification) = notifications.recv().await {
//!     if let Notification::Connected = notification {
//!         client.subscribe("sensors/#", 1).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod tls;
pub mod transport;

pub use config::{ClientSettings, ConfigField, ConnectionConfig};
pub use error::{ClientError, ProtocolError};
pub use observability::{EventSink, LogEvent, Notification};
pub use session::{ClientHandle, ConnectionState, MqttTlsClient};
pub use transport::QoS;
