//! Connection lifecycle and session operations
//!
//! [`ConnectionStateMachine::handle`] is the single mutation entry point.
//! User commands, engine events and reconnect expiries all arrive as an
//! [`Input`] and are applied one at a time, so connection state, the active
//! TLS context and the subscription registry are never touched concurrently.
//!
//! Engine events carry the [`Generation`] of the attempt that produced them.
//! Events from any attempt other than the current one are dropped, which is
//! what keeps a late disconnect from an abandoned attempt from re-arming the
//! reconnect timer after the user has already disconnected.

use crate::config::{ClientSettings, ConfigField, ConnectionConfig, KEEP_ALIVE};
use crate::error::{EngineErrorCode, ProtocolError};
use crate::observability::{EventSink, Notification};
use crate::session::reconnect::{
    ReconnectPolicy, ReconnectScheduler, ReconnectTicket, ReconnectionDecision,
};
use crate::session::subscriptions::{SubscriptionHandle, SubscriptionRegistry};
use crate::tls::{load_credentials, KeyFormatPolicy, TlsContext};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{
    ConnectRequest, Credentials, EngineEvent, EngineEventKind, Generation, ProtocolEngine, QoS,
};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use tracing::debug;

const SESSION_TARGET: &str = "mqtt_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-issued operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    Subscribe {
        topic: String,
        qos: u8,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        message: String,
        qos: u8,
        retain: bool,
    },
    /// Replace the configuration wholesale
    UpdateConfig(ConnectionConfig),
    SetAutoReconnect(bool),
}

#[derive(Debug, Clone)]
pub enum Input {
    Command(Command),
    Engine(EngineEvent),
    ReconnectDue(ReconnectTicket),
}

impl From<Command> for Input {
    fn from(command: Command) -> Self {
        Input::Command(command)
    }
}

impl From<EngineEvent> for Input {
    fn from(event: EngineEvent) -> Self {
        Input::Engine(event)
    }
}

pub struct ConnectionStateMachine<E> {
    engine: E,
    config: ConnectionConfig,
    key_policy: KeyFormatPolicy,
    reconnect: ReconnectScheduler,
    subscriptions: SubscriptionRegistry,
    sink: EventSink,
    state: ConnectionState,
    generation: Generation,
    user_disconnected: bool,
    active_tls: Option<TlsContext>,
    client_id: Option<String>,
}

impl<E: ProtocolEngine> ConnectionStateMachine<E> {
    pub fn new(engine: E, settings: &ClientSettings, sink: EventSink) -> Self {
        Self {
            engine,
            config: settings.broker.clone(),
            key_policy: KeyFormatPolicy::new(settings.tls.key_formats.clone()),
            reconnect: ReconnectScheduler::new(ReconnectPolicy::from(&settings.reconnect)),
            subscriptions: SubscriptionRegistry::new(),
            sink,
            state: ConnectionState::Disconnected,
            generation: Generation::default(),
            user_disconnected: false,
            active_tls: None,
            client_id: None,
        }
    }

    pub fn handle(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command),
            Input::Engine(event) => self.handle_engine_event(event),
            Input::ReconnectDue(ticket) => self.handle_reconnect_due(ticket),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn pending_reconnect(&self) -> Option<ReconnectTicket> {
        self.reconnect.pending()
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        self.reconnect.policy()
    }

    pub fn reconnects_armed(&self) -> u64 {
        self.reconnect.armed_total()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// TLS context of the live or in-flight attempt
    pub fn active_tls(&self) -> Option<&TlsContext> {
        self.active_tls.as_ref()
    }

    /// Client identifier used by the most recent attempt
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn user_disconnected(&self) -> bool {
        self.user_disconnected
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Tear everything down without waiting for the broker
    pub fn shutdown(&mut self) {
        self.user_disconnected = true;
        self.reconnect.cancel();
        self.engine.abort();
        if self.state != ConnectionState::Disconnected {
            self.generation = self.generation.next();
            self.enter_disconnected();
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Subscribe { topic, qos } => self.subscribe(&topic, qos),
            Command::Unsubscribe { topic } => self.unsubscribe(&topic),
            Command::Publish {
                topic,
                message,
                qos,
                retain,
            } => self.publish(&topic, message, qos, retain),
            Command::UpdateConfig(config) => self.update_config(config),
            Command::SetAutoReconnect(enabled) => self.set_auto_reconnect(enabled),
        }
    }

    fn connect(&mut self) {
        self.reconnect.cancel();
        self.user_disconnected = false;

        if self.state != ConnectionState::Disconnected {
            self.sink
                .log(format!("Connect ignored: client is already {}", self.state));
            return;
        }

        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let config = self.config.clone();
        let generation = self.generation.next();
        self.generation = generation;

        let _span = crate::mqtt_span!(
            host = %config.host_name,
            port = config.port,
            generation = generation.value()
        )
        .entered();

        let client_id = config.resolve_client_id();
        self.client_id = Some(client_id.clone());
        self.sink.log(format!(
            "Connecting to MQTT broker: {}:{}",
            config.host_name, config.port
        ));

        let bundle = load_credentials(
            config.ca_path(),
            config.client_cert_path(),
            config.client_key_path(),
            &self.key_policy,
            &self.sink,
        );

        let tls = match TlsContext::build(bundle, &self.sink) {
            Ok(tls) => tls,
            Err(e) => {
                self.fail_attempt(format!("TLS setup failed: {e}"));
                return;
            }
        };

        let request = ConnectRequest {
            generation,
            host: config.host_name.clone(),
            port: config.port,
            client_id,
            credentials: self.credentials(&config),
            keep_alive: KEEP_ALIVE,
            tls: tls.clone(),
        };

        match self.engine.connect_encrypted(request) {
            Ok(()) => {
                self.active_tls = Some(tls);
                self.set_state(ConnectionState::Connecting);
            }
            Err(e) => self.fail_attempt(format!("Failed to start connection: {e}")),
        }
    }

    /// An attempt that never reached the engine counts as a transport failure
    fn fail_attempt(&mut self, message: String) {
        self.sink.warn(message);
        let error = ProtocolError::TransportInvalid;
        self.sink.emit(Notification::Error {
            message: error.to_string(),
        });
        self.maybe_arm_reconnect();
    }

    fn credentials(&self, config: &ConnectionConfig) -> Option<Credentials> {
        let username = config.username.as_deref().filter(|u| !u.is_empty());
        let password = config.password.as_deref().filter(|p| !p.is_empty());

        match (username, password) {
            (Some(username), password) => Some(Credentials {
                username: username.to_string(),
                password: password.unwrap_or_default().to_string(),
            }),
            (None, Some(_)) => {
                self.sink
                    .warn("Password configured without a username, credentials not sent");
                None
            }
            (None, None) => None,
        }
    }

    fn disconnect(&mut self) {
        self.user_disconnected = true;
        self.reconnect.cancel();

        match self.state {
            ConnectionState::Connected => {
                self.sink.log("Disconnecting from broker");
                if let Err(e) = self.engine.disconnect() {
                    self.sink
                        .warn(format!("Disconnect request failed, closing connection: {e}"));
                    self.engine.abort();
                    self.generation = self.generation.next();
                    self.enter_disconnected();
                }
            }
            ConnectionState::Connecting => {
                self.sink.log("Disconnecting from broker");
                // Anything the abandoned attempt still reports is stale
                self.generation = self.generation.next();
                self.engine.abort();
                self.enter_disconnected();
            }
            ConnectionState::Disconnected => {
                debug!(target: SESSION_TARGET, "Disconnect while already disconnected");
            }
        }
    }

    fn guard_connected(&self, operation: &str) -> bool {
        if self.is_connected() {
            return true;
        }
        self.sink
            .log(format!("Cannot {operation}: client not connected"));
        false
    }

    fn parse_qos(&self, operation: &str, level: u8) -> Option<QoS> {
        match QoS::try_from(level) {
            Ok(qos) => Some(qos),
            Err(level) => {
                self.sink.log(format!(
                    "Cannot {operation}: invalid QoS level {level}, expected 0, 1 or 2"
                ));
                None
            }
        }
    }

    fn subscribe(&mut self, topic: &str, qos: u8) {
        if !self.guard_connected("subscribe") {
            return;
        }
        let Some(qos) = self.parse_qos("subscribe", qos) else {
            return;
        };

        match self.engine.subscribe(topic, qos) {
            Ok(id) => {
                self.subscriptions.insert(SubscriptionHandle {
                    id,
                    topic_filter: topic.to_string(),
                    qos,
                });
                self.sink.log(format!("Subscribed to topic: {topic}"));
            }
            Err(e) => {
                self.sink
                    .warn(format!("Failed to subscribe to topic: {topic} ({e})"));
            }
        }
    }

    fn unsubscribe(&mut self, topic: &str) {
        if !self.guard_connected("unsubscribe") {
            return;
        }

        match self.engine.unsubscribe(topic) {
            Ok(()) => {
                self.subscriptions.remove(topic);
                self.sink.log(format!("Unsubscribed from topic: {topic}"));
            }
            Err(e) => {
                self.sink
                    .warn(format!("Failed to unsubscribe from topic: {topic} ({e})"));
            }
        }
    }

    fn publish(&mut self, topic: &str, message: String, qos: u8, retain: bool) {
        if !self.guard_connected("publish") {
            return;
        }
        let Some(qos) = self.parse_qos("publish", qos) else {
            return;
        };

        match self
            .engine
            .publish(topic, Bytes::from(message.into_bytes()), qos, retain)
        {
            Ok(()) => self.sink.log(format!("Published message to topic: {topic}")),
            Err(e) => self
                .sink
                .warn(format!("Failed to publish message to topic: {topic} ({e})")),
        }
    }

    fn update_config(&mut self, config: ConnectionConfig) {
        let changed: Vec<ConfigField> = self.config.changed_fields(&config);
        self.config = config;

        debug!(target: SESSION_TARGET, changed = changed.len(), "Configuration replaced");
        for field in changed {
            self.sink.emit(Notification::ConfigChanged { field });
        }
    }

    fn set_auto_reconnect(&mut self, enabled: bool) {
        if self.reconnect.policy().enabled != enabled {
            debug!(target: SESSION_TARGET, enabled, "Auto-reconnect toggled");
        }
        self.reconnect.set_enabled(enabled);
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        if event.generation != self.generation {
            debug!(
                target: SESSION_TARGET,
                event_generation = %event.generation,
                current_generation = %self.generation,
                "Dropping event from a superseded attempt"
            );
            return;
        }

        match event.kind {
            EngineEventKind::Connected => self.on_connected(),
            EngineEventKind::Disconnected => self.on_disconnected(),
            EngineEventKind::Error(code) => self.on_error(code),
            EngineEventKind::Message { topic, payload } => self.on_message(topic, payload),
            EngineEventKind::PingResponse => self.sink.log("Ping response received"),
        }
    }

    fn on_connected(&mut self) {
        self.reconnect.cancel();
        if self.state == ConnectionState::Connected {
            return;
        }

        self.set_state(ConnectionState::Connected);
        self.sink.log("Connected to MQTT broker");
        self.sink.emit(Notification::Connected);
    }

    fn on_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        self.enter_disconnected();
        self.maybe_arm_reconnect();
    }

    fn on_error(&mut self, code: EngineErrorCode) {
        let Some(error) = ProtocolError::from_engine_code(code) else {
            return;
        };

        self.sink.warn(format!("Error: {error}"));
        self.sink.emit(Notification::Error {
            message: error.to_string(),
        });
    }

    fn on_message(&mut self, topic: String, payload: Bytes) {
        if self.subscriptions.route(&topic).is_none() {
            debug!(target: SESSION_TARGET, %topic, "Message matches no active subscription");
            return;
        }

        let payload = MessageHandler::decode_payload(&payload);
        self.sink
            .log(format!("Message received on [{topic}]: {payload}"));
        self.sink
            .emit(Notification::MessageReceived { topic, payload });
    }

    fn handle_reconnect_due(&mut self, ticket: ReconnectTicket) {
        if !self.reconnect.fire(ticket) {
            debug!(target: SESSION_TARGET, epoch = ticket.epoch(), "Ignoring stale reconnect timer");
            return;
        }

        match self.reconnect.decide(self.state, self.user_disconnected) {
            ReconnectionDecision::Proceed => {
                self.sink.log("Attempting to reconnect to MQTT broker...");
                self.start_attempt();
            }
            decision => {
                debug!(target: SESSION_TARGET, ?decision, "Reconnect skipped");
            }
        }
    }

    fn maybe_arm_reconnect(&mut self) {
        match self.reconnect.decide(self.state, self.user_disconnected) {
            ReconnectionDecision::Proceed => {
                let ticket = self.reconnect.arm();
                debug!(
                    target: SESSION_TARGET,
                    epoch = ticket.epoch(),
                    interval_ms = self.reconnect.policy().interval.as_millis() as u64,
                    "Reconnect armed"
                );
            }
            decision => {
                debug!(target: SESSION_TARGET, ?decision, "Reconnect not armed");
            }
        }
    }

    fn enter_disconnected(&mut self) {
        let dropped = self.subscriptions.clear();
        if dropped > 0 {
            debug!(target: SESSION_TARGET, dropped, "Subscriptions invalidated");
        }
        self.active_tls = None;

        self.set_state(ConnectionState::Disconnected);
        self.sink.log("Disconnected from MQTT broker");
        self.sink.emit(Notification::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;

        self.sink.log(format!("State changed: {state}"));
        self.sink.emit(Notification::StateChanged { state });
        self.sink.emit(Notification::ConnectedChanged {
            connected: self.is_connected(),
        });
    }
}
