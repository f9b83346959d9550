//! Connection parameters resolved from a profile
//!
//! The organization picks the connection kind; the kind picks the broker
//! host, the client id scheme and whether credentials are sent.

use crate::config::{BrokerSection, DeviceSection};
use crate::profiles::ConnectionProfile;
use crate::transport::{BrokerOptions, Credentials};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Organization name selecting the public quickstart broker
pub const QUICKSTART_ORG: &str = "quickstart";
/// Organization name selecting the M2M demo broker
pub const M2M_ORG: &str = "m2m";

/// Broker preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionKind {
    Quickstart,
    M2m,
    Registered,
}

impl ConnectionKind {
    pub fn for_organization(organization: &str) -> Self {
        match organization {
            QUICKSTART_ORG => ConnectionKind::Quickstart,
            M2M_ORG => ConnectionKind::M2m,
            _ => ConnectionKind::Registered,
        }
    }

    /// Quickstart sessions do not subscribe to commands
    pub fn subscribes_to_commands(self) -> bool {
        self != ConnectionKind::Quickstart
    }

    /// Quickstart sessions may not publish text events
    pub fn allows_text(self) -> bool {
        self != ConnectionKind::Quickstart
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionKind::Quickstart => "quickstart",
            ConnectionKind::M2m => "m2m",
            ConnectionKind::Registered => "registered",
        };
        f.write_str(name)
    }
}

/// A profile that cannot be connected with
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionConfigError {
    #[error("Device id is required")]
    MissingDeviceId,
    #[error("Organization is required")]
    MissingOrganization,
    #[error("Auth token is required for registered devices")]
    MissingAuthToken,
}

/// Immutable connection parameters for one connect attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub kind: ConnectionKind,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
}

impl ConnectionConfig {
    /// Check the profile can connect and derive host, client id and credentials
    pub fn resolve(
        profile: &ConnectionProfile,
        broker: &BrokerSection,
        device: &DeviceSection,
    ) -> Result<Self, ConnectionConfigError> {
        let organization = profile.organization.trim();
        let device_id = profile.device_id.trim();
        let kind = ConnectionKind::for_organization(organization);

        if device_id.is_empty() {
            return Err(ConnectionConfigError::MissingDeviceId);
        }

        let device_client_id =
            || format!("d:{organization}:{}:{device_id}", device.device_type);

        let config = match kind {
            ConnectionKind::Quickstart => Self {
                kind,
                host: broker.quickstart_host.clone(),
                port: broker.port,
                client_id: device_client_id(),
                credentials: None,
            },
            ConnectionKind::M2m => Self {
                kind,
                host: broker.m2m_host.clone(),
                port: broker.port,
                client_id: format!("{}{device_id}", broker.m2m_client_prefix),
                credentials: None,
            },
            ConnectionKind::Registered => {
                if organization.is_empty() {
                    return Err(ConnectionConfigError::MissingOrganization);
                }
                if profile.auth_token.is_empty() {
                    return Err(ConnectionConfigError::MissingAuthToken);
                }
                Self {
                    kind,
                    host: format!("{organization}.{}", broker.base_host),
                    port: broker.port,
                    client_id: device_client_id(),
                    credentials: Some(Credentials {
                        username: broker.username.clone(),
                        password: profile.auth_token.clone(),
                    }),
                }
            }
        };

        Ok(config)
    }

    /// Transport options; clean session is always requested
    pub fn broker_options(&self, broker: &BrokerSection) -> BrokerOptions {
        BrokerOptions {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            credentials: self.credentials.clone(),
            clean_session: true,
            keep_alive: broker.keep_alive(),
            connect_timeout: broker.connect_timeout(),
        }
    }
}
