//! Pure routing decisions for rumqttc event loop events

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// What the event loop should do with a polled event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK accepted; the session is live
    ConnectionAcknowledged,
    /// Inbound publish on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker closed the session
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// SUBACK contained at least one failure code
    SubscriptionRejected { packet_id: u16 },
    /// Pings, acks and other bookkeeping
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Classify an event loop event
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            },
            Packet::Disconnect => EventRoute::Disconnected,
            Packet::SubAck(suback) => {
                if suback
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    EventRoute::SubscriptionRejected {
                        packet_id: suback.pkid,
                    }
                } else {
                    EventRoute::InfrastructureEvent(format!("SubAck({})", suback.pkid))
                }
            }
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "iot-2/cmd/text/fmt/json",
            QoS::AtMostOnce,
            r#"{"d":{"text":"hello"}}"#,
        )));

        match route_mqtt_event(&publish) {
            EventRoute::MessageReceived { topic, payload } => {
                assert_eq!(topic, "iot-2/cmd/text/fmt/json");
                assert_eq!(&payload[..], br#"{"d":{"text":"hello"}}"#);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnects() {
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_route_suback() {
        let ok = Event::Incoming(Packet::SubAck(SubAck::new(
            1,
            vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
        )));
        assert!(matches!(
            route_mqtt_event(&ok),
            EventRoute::InfrastructureEvent(_)
        ));

        let rejected = Event::Incoming(Packet::SubAck(SubAck::new(
            2,
            vec![SubscribeReasonCode::Failure],
        )));
        assert_eq!(
            route_mqtt_event(&rejected),
            EventRoute::SubscriptionRejected { packet_id: 2 }
        );
    }

    #[test]
    fn test_route_pingresp() {
        assert!(matches!(
            route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::InfrastructureEvent(_)
        ));
    }
}
