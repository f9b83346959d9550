//! Named connection profiles and their persisted record form

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use super::preferences::PreferencesError;

const NAME_PREFIX: &str = "name:";
const ORG_PREFIX: &str = "org:";
const DEVICE_ID_PREFIX: &str = "deviceId:";
const AUTH_TOKEN_PREFIX: &str = "authToken:";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Profile record is missing the '{0}' field")]
    MissingField(&'static str),
    #[error("Profile name must not be empty")]
    EmptyName,
    #[error("Failed to persist profiles: {0}")]
    Persistence(#[from] PreferencesError),
}

/// Organization, device and credentials for one broker identity
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub organization: String,
    pub device_id: String,
    #[serde(skip_serializing)]
    pub auth_token: String,
}

impl ConnectionProfile {
    pub fn new(
        name: impl Into<String>,
        organization: impl Into<String>,
        device_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            organization: organization.into(),
            device_id: device_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// The unordered string set this profile is stored as
    pub fn to_record(&self) -> BTreeSet<String> {
        BTreeSet::from([
            format!("{NAME_PREFIX}{}", self.name),
            format!("{ORG_PREFIX}{}", self.organization),
            format!("{DEVICE_ID_PREFIX}{}", self.device_id),
            format!("{AUTH_TOKEN_PREFIX}{}", self.auth_token),
        ])
    }

    /// Rebuild a profile from its record. Entry order does not matter.
    pub fn from_record<'a, I>(entries: I) -> Result<Self, ProfileError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut name = None;
        let mut organization = None;
        let mut device_id = None;
        let mut auth_token = None;

        for entry in entries {
            if let Some(value) = entry.strip_prefix(NAME_PREFIX) {
                name = Some(value.to_string());
            } else if let Some(value) = entry.strip_prefix(ORG_PREFIX) {
                organization = Some(value.to_string());
            } else if let Some(value) = entry.strip_prefix(DEVICE_ID_PREFIX) {
                device_id = Some(value.to_string());
            } else if let Some(value) = entry.strip_prefix(AUTH_TOKEN_PREFIX) {
                auth_token = Some(value.to_string());
            }
        }

        let name = name.ok_or(ProfileError::MissingField("name"))?;
        if name.is_empty() {
            return Err(ProfileError::EmptyName);
        }

        Ok(Self {
            name,
            organization: organization.ok_or(ProfileError::MissingField("org"))?,
            device_id: device_id.ok_or(ProfileError::MissingField("deviceId"))?,
            auth_token: auth_token.ok_or(ProfileError::MissingField("authToken"))?,
        })
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("name", &self.name)
            .field("organization", &self.organization)
            .field("device_id", &self.device_id)
            .field("auth_token", &"***")
            .finish()
    }
}
