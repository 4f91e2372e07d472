//! Mock protocol engine for testing
//!
//! `MockEngine` records every primitive the state machine invokes so tests can
//! assert on exact call sequences, including "no engine call at all". Clones
//! share the same recording, so a test keeps one clone while the state machine
//! owns another.
//!
//! When an event channel is attached the mock can also play the broker side:
//! tests push engine events for the current attempt with [`MockEngine::emit`],
//! or enable auto-acknowledge so connects and disconnects complete on their own.

use crate::error::EngineError;
use crate::tls::KeyFormat;
use crate::transport::{
    ConnectRequest, EngineEvent, EngineEventKind, Generation, ProtocolEngine, QoS, SubscriptionId,
};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// One recorded engine primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Connect {
        generation: Generation,
        host: String,
        port: u16,
        client_id: String,
        username: Option<String>,
        identity: Option<KeyFormat>,
    },
    Disconnect,
    Abort,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
}

#[derive(Debug, Default)]
struct Failures {
    connect: bool,
    disconnect: bool,
    subscribe: bool,
    unsubscribe: bool,
    publish: bool,
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<EngineCall>,
    failures: Failures,
    next_subscription_id: u64,
    events: Option<mpsc::Sender<EngineEvent>>,
    current: Option<Generation>,
    auto_ack: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<Recording>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route emitted events into the driver's engine channel
    pub fn attach_events(&self, events: mpsc::Sender<EngineEvent>) {
        self.lock().events = Some(events);
    }

    /// Answer every connect with Connected and every disconnect with Disconnected
    pub fn set_auto_ack(&self, enabled: bool) {
        self.lock().auto_ack = enabled;
    }

    /// Push an event for the attempt currently in flight
    ///
    /// Returns false when no attempt is live or no channel is attached.
    pub fn emit(&self, kind: EngineEventKind) -> bool {
        let recording = self.lock();
        match recording.current {
            Some(generation) => Self::send(&recording, generation, kind),
            None => false,
        }
    }

    /// Push an event tagged with an arbitrary attempt generation
    pub fn emit_for(&self, generation: Generation, kind: EngineEventKind) -> bool {
        Self::send(&self.lock(), generation, kind)
    }

    fn send(recording: &Recording, generation: Generation, kind: EngineEventKind) -> bool {
        recording
            .events
            .as_ref()
            .is_some_and(|tx| tx.try_send(EngineEvent::new(generation, kind)).is_ok())
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().failures.connect = fail;
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.lock().failures.disconnect = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.lock().failures.subscribe = fail;
    }

    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.lock().failures.unsubscribe = fail;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.lock().failures.publish = fail;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn connect_calls(&self) -> Vec<EngineCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, EngineCall::Connect { .. }))
            .cloned()
            .collect()
    }

    /// Generation of the most recent connect request
    pub fn last_generation(&self) -> Option<Generation> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            EngineCall::Connect { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, call: EngineCall, fail: impl FnOnce(&Failures) -> bool) -> Result<(), EngineError> {
        let mut recording = self.lock();
        recording.calls.push(call);
        if fail(&recording.failures) {
            return Err(EngineError::Rejected("mock failure".to_string()));
        }
        Ok(())
    }
}

impl ProtocolEngine for MockEngine {
    fn connect_encrypted(&mut self, request: ConnectRequest) -> Result<(), EngineError> {
        let generation = request.generation;
        self.record(
            EngineCall::Connect {
                generation,
                host: request.host,
                port: request.port,
                client_id: request.client_id,
                username: request.credentials.map(|c| c.username),
                identity: request.tls.identity(),
            },
            |f| f.connect,
        )?;

        let mut recording = self.lock();
        recording.current = Some(generation);
        if recording.auto_ack {
            Self::send(&recording, generation, EngineEventKind::Connected);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::Disconnect, |f| f.disconnect)?;

        let mut recording = self.lock();
        if let Some(generation) = recording.current.take() {
            if recording.auto_ack {
                Self::send(&recording, generation, EngineEventKind::Disconnected);
            }
        }
        Ok(())
    }

    fn abort(&mut self) {
        let mut recording = self.lock();
        recording.calls.push(EngineCall::Abort);
        recording.current = None;
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<SubscriptionId, EngineError> {
        self.record(
            EngineCall::Subscribe {
                topic: topic.to_string(),
                qos,
            },
            |f| f.subscribe,
        )?;
        let mut recording = self.lock();
        recording.next_subscription_id += 1;
        Ok(SubscriptionId(recording.next_subscription_id))
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), EngineError> {
        self.record(
            EngineCall::Unsubscribe {
                topic: topic.to_string(),
            },
            |f| f.unsubscribe,
        )
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        self.record(
            EngineCall::Publish {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            },
            |f| f.publish,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_recording() {
        let engine = MockEngine::new();
        let mut owned = engine.clone();

        owned.subscribe("a/#", QoS::AtLeastOnce).unwrap();
        owned.abort();

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Subscribe {
                    topic: "a/#".to_string(),
                    qos: QoS::AtLeastOnce
                },
                EngineCall::Abort
            ]
        );
        engine.clear();
        assert!(owned.calls().is_empty());
    }

    #[test]
    fn test_configured_failures_are_still_recorded() {
        let mut engine = MockEngine::new();
        engine.set_fail_publish(true);

        let result = engine.publish("t", Bytes::from_static(b"x"), QoS::AtMostOnce, false);

        assert!(result.is_err());
        assert_eq!(engine.calls().len(), 1);
        assert!(engine.unsubscribe("t").is_ok());
    }

    #[test]
    fn test_emit_requires_live_attempt() {
        let engine = MockEngine::new();
        let (tx, mut rx) = mpsc::channel(4);
        engine.attach_events(tx);

        assert!(!engine.emit(EngineEventKind::Connected));
        assert!(engine.emit_for(Generation::default().next(), EngineEventKind::Disconnected));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EngineEventKind::Disconnected);
        assert_eq!(event.generation.value(), 1);
    }
}
