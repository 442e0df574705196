//! Pure routing of rumqttc events

use crate::transport::{LossReason, LOSS_PING_TIMEOUT, LOSS_REFUSED, LOSS_SOCKET_CLOSED};
use rumqttc::{ConnectionError, Event, Packet, StateError, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback
                        .return_codes
                        .iter()
                        .map(Self::reason_code_byte)
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn reason_code_byte(code: &SubscribeReasonCode) -> u8 {
        match code {
            SubscribeReasonCode::Success(qos) => *qos as u8,
            SubscribeReasonCode::Failure => 0x80,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(return_codes: &[u8]) -> Result<(), String> {
        if return_codes.iter().any(|&code| code >= 0x80) {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        } else {
            Ok(())
        }
    }

    /// Classify an event-loop error into a loss reason
    ///
    /// `shutdown_requested` marks errors raised by our own disconnect.
    pub fn loss_reason(error: &ConnectionError, shutdown_requested: bool) -> LossReason {
        if shutdown_requested {
            return LossReason::graceful("Client disconnected");
        }
        let code = match error {
            ConnectionError::MqttState(StateError::AwaitPingResp) => LOSS_PING_TIMEOUT,
            ConnectionError::ConnectionRefused(_) => LOSS_REFUSED,
            _ => LOSS_SOCKET_CLOSED,
        };
        LossReason::abnormal(code, error.to_string())
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Subscription confirmed with return codes
    SubscriptionConfirmed { packet_id: u16, return_codes: Vec<u8> },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
