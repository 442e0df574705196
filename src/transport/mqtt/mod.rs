//! MQTT-over-WebSocket transport built on rumqttc
//!
//! - [`connection`] - pure option construction from a signed descriptor
//! - [`message_handler`] - pure event routing and loss classification
//! - [`client`] - the connector, the event-loop task and the transport handle

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttConnector, MqttTransport};
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};
