//! Transport capability consumed by the session
//!
//! The session depends only on the [`Transport`] and [`TransportFactory`]
//! traits; [`mqtt`] provides the rumqttc-backed implementation and
//! `testing::mocks` a scripted one.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Paho reason code for "broker unavailable" (CONNACK return code 3)
pub const BROKER_UNAVAILABLE_CODE: u8 = 3;

/// MQTT quality of service, passed through to the transport unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = TransportError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(TransportError::InvalidQos(other)),
        }
    }
}

/// Username/password pair sent on connect
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Everything a transport needs to reach the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl BrokerOptions {
    /// `tcp://host:port`
    pub fn server_uri(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Unsolicited events raised by a live transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inbound publish on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// Link dropped without a client-initiated disconnect
    ConnectionLost { reason: Option<String> },
}

/// Sink a transport pushes its [`TransportEvent`]s into
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Broker unavailable")]
    BrokerUnavailable,
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("Not connected")]
    NotConnected,
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Unsubscribe failed")]
    UnsubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URI: {0}")]
    InvalidBrokerUri(String),
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
}

impl TransportError {
    /// Paho-compatible reason code, where one applies
    pub fn reason_code(&self) -> Option<u8> {
        match self {
            TransportError::BrokerUnavailable => Some(BROKER_UNAVAILABLE_CODE),
            _ => None,
        }
    }

    pub fn is_broker_unavailable(&self) -> bool {
        self.reason_code() == Some(BROKER_UNAVAILABLE_CODE)
    }
}

/// Broker connection capability.
///
/// Every async method resolves once the transport has accepted or rejected
/// the request; callers run them on a separate task and correlate the
/// result themselves.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection; resolves on CONNACK or failure
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection gracefully
    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retained: bool,
    ) -> Result<(), TransportError>;

    /// Synchronous connection probe
    fn is_connected(&self) -> bool;

    /// Drop background resources; safe to call more than once
    fn release(&self);
}

/// Builds fresh transport handles for each connect attempt
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        options: &BrokerOptions,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(QoS::try_from(3), Err(TransportError::InvalidQos(3))));
        assert_eq!(QoS::ExactlyOnce.level(), 2);
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "use-token-auth".to_string(),
            password: "s3cret-token".to_string(),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("use-token-auth"));
        assert!(!debug.contains("s3cret-token"));
    }

    #[test]
    fn test_broker_unavailable_code() {
        assert_eq!(TransportError::BrokerUnavailable.reason_code(), Some(3));
        assert!(TransportError::BrokerUnavailable.is_broker_unavailable());
        assert!(!TransportError::NotConnected.is_broker_unavailable());
        assert_eq!(TransportError::Timeout(Duration::from_secs(1)).reason_code(), None);
    }

    #[test]
    fn test_server_uri() {
        let options = BrokerOptions {
            host: "acme.messaging.example.test".to_string(),
            port: 1883,
            client_id: "d:acme:Android:dev2".to_string(),
            credentials: None,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        };
        assert_eq!(options.server_uri(), "tcp://acme.messaging.example.test:1883");
    }

    #[test]
    fn test_transport_error_display() {
        let errors = vec![
            TransportError::BrokerUnavailable,
            TransportError::ConnectionRefused("bad credentials".to_string()),
            TransportError::ConnectionFailed("io".to_string().into()),
            TransportError::Timeout(Duration::from_secs(5)),
            TransportError::NotConnected,
            TransportError::PublishFailed("test".to_string().into()),
            TransportError::SubscriptionFailed("test".to_string().into()),
            TransportError::UnsubscribeFailed("test".to_string().into()),
            TransportError::DisconnectFailed("test".to_string().into()),
            TransportError::InvalidBrokerUri("::".to_string()),
            TransportError::InvalidClientId(String::new()),
            TransportError::InvalidQos(7),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
