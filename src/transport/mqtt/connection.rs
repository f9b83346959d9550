//! Pure option building and error mapping for the MQTT transport

use crate::transport::{BrokerOptions, QoS, TransportError};
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions};
use std::time::Duration;
use url::Url;

/// Smallest keep-alive interval handed to rumqttc
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Validate a client id the way rumqttc expects before it can panic on it
pub fn validate_client_id(client_id: &str) -> Result<(), TransportError> {
    if client_id.is_empty() || client_id.starts_with(char::is_whitespace) {
        return Err(TransportError::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}

/// Parse `tcp://host:port` back into host and port
pub fn parse_server_uri(uri: &str) -> Result<(String, u16), TransportError> {
    let url = Url::parse(uri).map_err(|_| TransportError::InvalidBrokerUri(uri.to_string()))?;
    if url.scheme() != "tcp" {
        return Err(TransportError::InvalidBrokerUri(uri.to_string()));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUri(uri.to_string()))?;
    let port = url.port().unwrap_or(1883);

    Ok((host.to_string(), port))
}

/// Build rumqttc options from broker options
pub fn configure_mqtt_options(options: &BrokerOptions) -> Result<MqttOptions, TransportError> {
    validate_client_id(&options.client_id)?;
    let (host, port) = parse_server_uri(&options.server_uri())?;

    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), host, port);
    mqtt_options.set_clean_session(options.clean_session);
    mqtt_options.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    Ok(mqtt_options)
}

/// Map an event loop failure onto the transport error taxonomy
pub fn map_connection_error(error: &ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => map_return_code(code),
        other => TransportError::ConnectionFailed(other.to_string().into()),
    }
}

/// CONNACK return code 3 is the distinguished broker-unavailable failure
pub fn map_return_code(code: &ConnectReturnCode) -> TransportError {
    match code {
        ConnectReturnCode::ServiceUnavailable => TransportError::BrokerUnavailable,
        other => TransportError::ConnectionRefused(format!("{other:?}")),
    }
}
