//! rumqttc-backed protocol engine
//!
//! Each connect attempt gets its own `AsyncClient`/`EventLoop` pair and a
//! spawned task that polls the event loop and forwards engine events tagged
//! with the attempt's generation. The task stops at the first disconnect or
//! error; retry policy belongs to the reconnect scheduler, not to rumqttc.

use super::message_handler::{EventRoute, MessageHandler};
use crate::error::EngineError;
use crate::transport::{
    ConnectRequest, EngineEvent, EngineEventKind, Generation, ProtocolEngine, QoS, SubscriptionId,
};
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use rumqttc::{TlsConfiguration, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Capacity of the rumqttc request channel
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

pub struct RumqttEngine {
    events: mpsc::Sender<EngineEvent>,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    next_subscription_id: u64,
}

impl RumqttEngine {
    pub fn new(events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            events,
            client: None,
            event_loop_handle: None,
            next_subscription_id: 0,
        }
    }

    /// Build rumqttc options for one attempt
    pub fn configure_mqtt_options(request: &ConnectRequest) -> MqttOptions {
        let mut options = MqttOptions::new(&request.client_id, &request.host, request.port);
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            request.tls.client_config(),
        )));
        options.set_keep_alive(request.keep_alive);
        options.set_clean_start(true);
        if let Some(credentials) = &request.credentials {
            options.set_credentials(&credentials.username, &credentials.password);
        }
        options
    }

    fn client(&self) -> Result<&AsyncClient, EngineError> {
        self.client.as_ref().ok_or(EngineError::NotRunning)
    }

    async fn run_event_loop(
        generation: Generation,
        mut event_loop: EventLoop,
        events: mpsc::Sender<EngineEvent>,
    ) {
        debug!(target: "mqtt_engine", %generation, "Event loop started");

        loop {
            let kind = match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => EngineEventKind::Connected,
                    EventRoute::MessageReceived { topic, payload } => {
                        EngineEventKind::Message { topic, payload }
                    }
                    EventRoute::PingResponse => EngineEventKind::PingResponse,
                    EventRoute::Disconnected | EventRoute::LocalDisconnect => {
                        debug!(target: "mqtt_engine", %generation, "Session closed");
                        let _ = events
                            .send(EngineEvent::new(generation, EngineEventKind::Disconnected))
                            .await;
                        break;
                    }
                    EventRoute::InfrastructureEvent(description) => {
                        trace!(target: "mqtt_engine", %generation, "{}", description);
                        continue;
                    }
                    EventRoute::OutgoingEvent => continue,
                },
                Err(error) => {
                    warn!(target: "mqtt_engine", %generation, "Connection error: {}", error);
                    let code = MessageHandler::classify_connection_error(error);
                    let _ = events
                        .send(EngineEvent::new(generation, EngineEventKind::Error(code)))
                        .await;
                    let _ = events
                        .send(EngineEvent::new(generation, EngineEventKind::Disconnected))
                        .await;
                    break;
                }
            };

            if events.send(EngineEvent::new(generation, kind)).await.is_err() {
                debug!(target: "mqtt_engine", %generation, "Event receiver dropped");
                break;
            }
        }
    }
}

impl ProtocolEngine for RumqttEngine {
    fn connect_encrypted(&mut self, request: ConnectRequest) -> Result<(), EngineError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        self.abort();

        let options = Self::configure_mqtt_options(&request);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let handle = runtime.spawn(Self::run_event_loop(
            request.generation,
            event_loop,
            self.events.clone(),
        ));

        self.client = Some(client);
        self.event_loop_handle = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.client()?
            .try_disconnect()
            .map_err(|e| EngineError::Rejected(e.to_string()))
    }

    fn abort(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.client = None;
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<SubscriptionId, EngineError> {
        self.client()?
            .try_subscribe(topic, MessageHandler::to_mqtt_qos(qos))
            .map_err(|e| EngineError::Rejected(e.to_string()))?;
        self.next_subscription_id += 1;
        Ok(SubscriptionId(self.next_subscription_id))
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), EngineError> {
        self.client()?
            .try_unsubscribe(topic)
            .map_err(|e| EngineError::Rejected(e.to_string()))
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        self.client()?
            .try_publish(topic, MessageHandler::to_mqtt_qos(qos), retain, payload)
            .map_err(|e| EngineError::Rejected(e.to_string()))
    }
}

impl Drop for RumqttEngine {
    fn drop(&mut self) {
        self.abort();
    }
}
