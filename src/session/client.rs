//! Async driver for the connection state machine
//!
//! [`MqttTlsClient::spawn`] moves a [`ConnectionStateMachine`] onto its own
//! tokio task. The task waits on user commands, engine events and the pending
//! reconnect deadline, and feeds whichever arrives first into
//! [`ConnectionStateMachine::handle`].

use crate::config::{ClientSettings, ConnectionConfig};
use crate::error::ClientError;
use crate::observability::{EventSink, Notification};
use crate::session::state_machine::{Command, ConnectionStateMachine, Input};
use crate::transport::mqtt::RumqttEngine;
use crate::transport::{EngineEvent, ProtocolEngine};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

pub const COMMAND_CHANNEL_CAPACITY: usize = 32;
pub const ENGINE_EVENT_CAPACITY: usize = 100;

pub struct MqttTlsClient;

impl MqttTlsClient {
    /// Start a driver task around the engine returned by `engine_factory`
    ///
    /// The factory receives the sending half of the engine event channel.
    /// Must be called from within a tokio runtime.
    pub fn spawn<E, F>(settings: ClientSettings, engine_factory: F) -> (ClientHandle, JoinHandle<()>)
    where
        E: ProtocolEngine + 'static,
        F: FnOnce(mpsc::Sender<EngineEvent>) -> E,
    {
        let (event_tx, event_rx) = mpsc::channel(ENGINE_EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sink = EventSink::default();
        let machine = ConnectionStateMachine::new(engine_factory(event_tx), &settings, sink.clone());

        let handle = tokio::spawn(run_driver(machine, command_rx, event_rx, shutdown_rx));

        let client = ClientHandle {
            commands: command_tx,
            sink,
            shutdown: Arc::new(shutdown_tx),
        };
        (client, handle)
    }

    /// Start a driver backed by the rumqttc engine
    pub fn spawn_rumqtt(settings: ClientSettings) -> (ClientHandle, JoinHandle<()>) {
        Self::spawn(settings, RumqttEngine::new)
    }
}

async fn run_driver<E: ProtocolEngine>(
    mut machine: ConnectionStateMachine<E>,
    mut commands: mpsc::Receiver<Command>,
    mut engine_events: mpsc::Receiver<EngineEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Session driver started");

    loop {
        let pending = machine.pending_reconnect();
        let due = pending.map_or_else(Instant::now, |ticket| ticket.due);

        tokio::select! {
            // Shutdown wins over queued work
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received");
                    break;
                }
            }

            command = commands.recv() => match command {
                Some(command) => machine.handle(Input::Command(command)),
                None => {
                    debug!("All client handles dropped");
                    break;
                }
            },

            Some(event) = engine_events.recv() => machine.handle(Input::Engine(event)),

            _ = tokio::time::sleep_until(due), if pending.is_some() => {
                if let Some(ticket) = pending {
                    machine.handle(Input::ReconnectDue(ticket));
                }
            }
        }
    }

    machine.shutdown();
    info!("Session driver stopped");
}

/// Cloneable front end to a running driver task
///
/// Every operation only enqueues a command. Outcomes are reported through
/// [`ClientHandle::notifications`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    sink: EventSink,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect).await
    }

    pub async fn subscribe(&self, topic: impl Into<String>, qos: u8) -> Result<(), ClientError> {
        self.send(Command::Subscribe {
            topic: topic.into(),
            qos,
        })
        .await
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe {
            topic: topic.into(),
        })
        .await
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        message: impl Into<String>,
        qos: u8,
        retain: bool,
    ) -> Result<(), ClientError> {
        self.send(Command::Publish {
            topic: topic.into(),
            message: message.into(),
            qos,
            retain,
        })
        .await
    }

    /// Replace the configuration used by the next connection attempt
    pub async fn update_config(&self, config: ConnectionConfig) -> Result<(), ClientError> {
        self.send(Command::UpdateConfig(config)).await
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<(), ClientError> {
        self.send(Command::SetAutoReconnect(enabled)).await
    }

    /// Stop the driver task, dropping any live connection
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.shutdown.send(true).map_err(|_| ClientError::Closed)
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.sink.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionState;
    use crate::testing::{drain_notifications, EngineCall, MockEngine};
    use crate::transport::EngineEventKind;
    use std::time::Duration;

    fn spawn_mock(settings: ClientSettings) -> (ClientHandle, JoinHandle<()>, MockEngine) {
        let engine = MockEngine::new();
        let driver_engine = engine.clone();
        let (client, task) = MqttTlsClient::spawn(settings, |events| {
            driver_engine.attach_events(events);
            driver_engine
        });
        (client, task, engine)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn states(notifications: &[Notification]) -> Vec<ConnectionState> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::StateChanged { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_round_trip_through_driver() {
        let (client, _task, engine) = spawn_mock(ClientSettings::default());
        engine.set_auto_ack(true);
        let mut rx = client.notifications();

        client.connect().await.unwrap();
        settle().await;

        let notifications = drain_notifications(&mut rx);
        assert_eq!(
            states(&notifications),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(notifications.contains(&Notification::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_fires_after_interval() {
        let (client, _task, engine) = spawn_mock(ClientSettings::default());
        engine.set_auto_ack(true);
        client.connect().await.unwrap();
        settle().await;

        engine.emit(EngineEventKind::Disconnected);
        settle().await;
        assert_eq!(engine.connect_calls().len(), 1);

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(engine.connect_calls().len(), 1);

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        settle().await;
        assert_eq!(engine.connect_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task_and_aborts_engine() {
        let (client, task, engine) = spawn_mock(ClientSettings::default());
        client.connect().await.unwrap();
        settle().await;

        client.shutdown().unwrap();
        task.await.unwrap();

        assert_eq!(engine.calls().last(), Some(&EngineCall::Abort));
        assert!(matches!(client.connect().await, Err(ClientError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_stops_driver() {
        let (client, task, _engine) = spawn_mock(ClientSettings::default());
        drop(client);
        task.await.unwrap();
    }
}
