//! Topic construction and classification for device events and commands
//!
//! Event topics are `iot-2/evt/<kind>/fmt/json`, command topics are
//! `iot-2/cmd/<command>/fmt/json`. The device subscribes to every command
//! through the single-level wildcard `+`.

use thiserror::Error;

/// Prefix of every event topic published by the device
pub const EVENT_TOPIC_PREFIX: &str = "iot-2/evt/";
/// Prefix of every command topic the device receives
pub const COMMAND_TOPIC_PREFIX: &str = "iot-2/cmd/";
/// Format suffix shared by event and command topics
pub const FORMAT_TOPIC_SUFFIX: &str = "/fmt/json";
/// Single-level MQTT wildcard
pub const WILDCARD: &str = "+";

/// Event kinds carried in topic strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Color,
    Light,
    Text,
    Touch,
    Alert,
    Accel,
}

impl EventKind {
    /// Topic segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Color => "color",
            EventKind::Light => "light",
            EventKind::Text => "text",
            EventKind::Touch => "touchmove",
            EventKind::Alert => "alert",
            EventKind::Accel => "accel",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the publish topic for an event kind
pub fn event_topic(kind: EventKind) -> String {
    format!("{EVENT_TOPIC_PREFIX}{}{FORMAT_TOPIC_SUFFIX}", kind.as_str())
}

/// Build the subscribe topic for a command name (or [`WILDCARD`])
pub fn command_topic(command: &str) -> Result<String, TopicError> {
    validate_command(command)?;
    Ok(format!("{COMMAND_TOPIC_PREFIX}{command}{FORMAT_TOPIC_SUFFIX}"))
}

/// Wildcard command topic every non-quickstart session subscribes to
pub fn command_wildcard_topic() -> String {
    format!("{COMMAND_TOPIC_PREFIX}{WILDCARD}{FORMAT_TOPIC_SUFFIX}")
}

/// Commands are single topic levels: either the `+` wildcard or a name
/// without separators or wildcards
pub fn validate_command(command: &str) -> Result<(), TopicError> {
    if command.is_empty() {
        return Err(TopicError::EmptyCommand);
    }
    if command == WILDCARD {
        return Ok(());
    }

    for ch in command.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(TopicError::InvalidCommandChar(ch));
        }
    }

    Ok(())
}

/// Topic construction errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Command name cannot be empty")]
    EmptyCommand,
    #[error("Command name contains invalid character: '{0}'")]
    InvalidCommandChar(char),
}
