//! MQTT v5 protocol engine backed by rumqttc
//!
//! - [`message_handler`] - pure routing of rumqttc events and errors
//! - [`engine`] - the [`RumqttEngine`] that owns the client and event loop task
//!
//! ```rust,no_run
//! use mqttls::transport::mqtt::RumqttEngine;
//! use tokio::sync::mpsc;
//!
//! let (events_tx, mut events_rx) = mpsc::channel(64);
//! let engine = RumqttEngine::new(events_tx);
//! # drop((engine, events_rx.try_recv()));
//! ```

pub mod engine;
pub mod message_handler;

pub use engine::{RumqttEngine, REQUEST_CHANNEL_CAPACITY};
pub use message_handler::{EventRoute, MessageHandler};
