//! MQTT 3.1.1 transport over rumqttc
//!
//! Split the same way throughout:
//!
//! - [`connection`] - pure option building and error mapping
//! - [`message_handler`] - pure routing of event loop events
//! - [`client`] - the impure transport and its event loop task

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttTransport, MqttTransportFactory};
pub use connection::{configure_mqtt_options, map_connection_error};
pub use message_handler::{route_mqtt_event, EventRoute};
