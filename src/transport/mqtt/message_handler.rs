//! Pure routing and classification of rumqttc events
//!
//! Nothing here performs I/O, so the mapping from rumqttc's event and error
//! types onto engine events can be tested without a broker.

use crate::error::EngineErrorCode;
use crate::transport::QoS;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{mqttbytes, ConnectionError, Event};
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT v5 event to the action the event loop should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::PingResp(_) => EventRoute::PingResponse,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Fold a rumqttc connection error into the engine's error code
    pub fn classify_connection_error(error: ConnectionError) -> EngineErrorCode {
        match error {
            ConnectionError::ConnectionRefused(code) => Self::classify_return_code(code),
            ConnectionError::Tls(_) | ConnectionError::Io(_) => EngineErrorCode::TransportInvalid,
            ConnectionError::MqttState(_) | ConnectionError::NotConnAck(_) => {
                EngineErrorCode::ProtocolViolation
            }
            _ => EngineErrorCode::Unknown,
        }
    }

    /// Map a CONNACK refusal onto the engine's error code
    pub fn classify_return_code(code: ConnectReturnCode) -> EngineErrorCode {
        use ConnectReturnCode::*;

        match code {
            Success => EngineErrorCode::NoError,
            RefusedProtocolVersion | UnsupportedProtocolVersion => {
                EngineErrorCode::InvalidProtocolVersion
            }
            BadClientId | ClientIdentifierNotValid => EngineErrorCode::IdRejected,
            ServiceUnavailable | ServerUnavailable | ServerBusy => {
                EngineErrorCode::ServerUnavailable
            }
            BadUserNamePassword | BadAuthenticationMethod => {
                EngineErrorCode::BadUsernameOrPassword
            }
            NotAuthorized | Banned => EngineErrorCode::NotAuthorized,
            MalformedPacket | ProtocolError => EngineErrorCode::ProtocolViolation,
            _ => EngineErrorCode::Unknown,
        }
    }

    pub fn to_mqtt_qos(qos: QoS) -> mqttbytes::QoS {
        match qos {
            QoS::AtMostOnce => mqttbytes::QoS::AtMostOnce,
            QoS::AtLeastOnce => mqttbytes::QoS::AtLeastOnce,
            QoS::ExactlyOnce => mqttbytes::QoS::ExactlyOnce,
        }
    }

    /// Payload as text; invalid UTF-8 sequences are replaced
    pub fn decode_payload(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// Event routing decisions
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived { topic: String, payload: Bytes },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our own DISCONNECT has been written
    LocalDisconnect,
    /// Broker answered a keep-alive ping
    PingResponse,
    InfrastructureEvent(String),
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, Disconnect, DisconnectReasonCode, PingResp, Publish,
    };

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_broker_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: mqttbytes::QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("sensors/kitchen/temp"),
            pkid: 1,
            payload: Bytes::from("21.5"),
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::MessageReceived {
                topic: "sensors/kitchen/temp".to_string(),
                payload: Bytes::from("21.5"),
            }
        );
    }

    #[test]
    fn test_route_ping_response() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp(PingResp))),
            EventRoute::PingResponse
        );
    }

    #[test]
    fn test_route_outgoing() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::LocalDisconnect
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_classify_refused_connection() {
        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(
            MessageHandler::classify_connection_error(error),
            EngineErrorCode::NotAuthorized
        );

        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(
            MessageHandler::classify_connection_error(error),
            EngineErrorCode::BadUsernameOrPassword
        );
    }

    #[test]
    fn test_return_codes_map_by_meaning() {
        let cases = [
            (ConnectReturnCode::Success, EngineErrorCode::NoError),
            (
                ConnectReturnCode::RefusedProtocolVersion,
                EngineErrorCode::InvalidProtocolVersion,
            ),
            (
                ConnectReturnCode::UnsupportedProtocolVersion,
                EngineErrorCode::InvalidProtocolVersion,
            ),
            (ConnectReturnCode::BadClientId, EngineErrorCode::IdRejected),
            (
                ConnectReturnCode::ClientIdentifierNotValid,
                EngineErrorCode::IdRejected,
            ),
            (
                ConnectReturnCode::ServiceUnavailable,
                EngineErrorCode::ServerUnavailable,
            ),
            (
                ConnectReturnCode::ServerUnavailable,
                EngineErrorCode::ServerUnavailable,
            ),
            (ConnectReturnCode::ServerBusy, EngineErrorCode::ServerUnavailable),
            (
                ConnectReturnCode::BadUserNamePassword,
                EngineErrorCode::BadUsernameOrPassword,
            ),
            (
                ConnectReturnCode::BadAuthenticationMethod,
                EngineErrorCode::BadUsernameOrPassword,
            ),
            (ConnectReturnCode::NotAuthorized, EngineErrorCode::NotAuthorized),
            (ConnectReturnCode::Banned, EngineErrorCode::NotAuthorized),
            (
                ConnectReturnCode::MalformedPacket,
                EngineErrorCode::ProtocolViolation,
            ),
            (
                ConnectReturnCode::ProtocolError,
                EngineErrorCode::ProtocolViolation,
            ),
            (ConnectReturnCode::UnspecifiedError, EngineErrorCode::Unknown),
            (ConnectReturnCode::QuotaExceeded, EngineErrorCode::Unknown),
        ];

        for (code, expected) in cases {
            assert_eq!(
                MessageHandler::classify_return_code(code),
                expected,
                "{code:?}"
            );
        }
    }

    #[test]
    fn test_classify_io_error_as_transport() {
        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(
            MessageHandler::classify_connection_error(error),
            EngineErrorCode::TransportInvalid
        );
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(
            MessageHandler::to_mqtt_qos(QoS::AtMostOnce),
            mqttbytes::QoS::AtMostOnce
        );
        assert_eq!(
            MessageHandler::to_mqtt_qos(QoS::ExactlyOnce),
            mqttbytes::QoS::ExactlyOnce
        );
    }

    #[test]
    fn test_decode_payload_is_lossy() {
        assert_eq!(MessageHandler::decode_payload(b"hello"), "hello");
        assert_eq!(
            MessageHandler::decode_payload(&[0x68, 0x69, 0xFF]),
            "hi\u{FFFD}"
        );
    }
}
