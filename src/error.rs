//! Error types for the device client
//!
//! Each layer owns a `thiserror` enum; [`SessionError`] is what the public
//! session API returns and [`IotError`] wraps everything for the binary.

use crate::session::connection::ConnectionConfigError;
use crate::session::outcome::OperationKind;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Errors returned by the session API
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session service has stopped")]
    ServiceStopped,

    #[error("Operation rejected while {0:?} is in flight")]
    OperationInFlight(OperationKind),

    #[error("Not connected")]
    NotConnected,

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Invalid connection parameters: {0}")]
    InvalidConnection(#[from] ConnectionConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Payload error: {0}")]
    Payload(#[from] crate::protocol::PayloadError),

    #[error("Topic error: {0}")]
    Topic(#[from] crate::protocol::TopicError),
}

/// Top-level error for the binary and library consumers
#[derive(Debug, Error)]
pub enum IotError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Profile error: {0}")]
    Profile(#[from] crate::profiles::ProfileError),

    #[error("Preferences error: {0}")]
    Preferences(#[from] crate::profiles::PreferencesError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Routing error: {0}")]
    Route(#[from] crate::routing::RouteError),

    #[error("{0}")]
    Other(String),
}

impl IotError {
    /// Display text with secrets redacted, for logs and terminal output
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|authtoken|secret)[=:]\s*\S+").ok());

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credential-looking fragments and cap the message length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = match SECRET_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}=***").to_string(),
        None => message.to_string(),
    };

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for crate-level operations
pub type IotResult<T> = Result<T, IotError>;
