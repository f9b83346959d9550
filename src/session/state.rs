//! Shared session state owned by the session service
//!
//! Everything here is plain data: the service task is the only writer, so
//! no locking is needed.

use crate::protocol::Argb;
use crate::session::connection::ConnectionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Consumer surfaces that can be active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViewKind {
    /// Connection form; sees connect/disconnect notifications
    Login,
    /// Live device view; sees publish/receive counters and color changes
    Messaging,
    /// Received text log
    Log,
    /// Profile list
    Profiles,
    /// Drawing canvas; sees color changes only
    Drawing,
}

impl ViewKind {
    /// Views that show the unread badge and receive unread/alert events
    pub fn is_badge_target(self) -> bool {
        matches!(
            self,
            ViewKind::Login | ViewKind::Messaging | ViewKind::Log | ViewKind::Profiles
        )
    }

    /// Views that render the background color
    pub fn shows_color(self) -> bool {
        matches!(self, ViewKind::Messaging | ViewKind::Drawing)
    }
}

/// Session counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Counters {
    pub publish_count: u64,
    pub receive_count: u64,
    pub unread_count: u64,
}

/// Append-only log of received text, consumed as a unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageLog {
    entries: Vec<String>,
}

impl MessageLog {
    pub fn push(&mut self, text: String) {
        self.entries.push(text);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return every entry and leave the log empty
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.entries)
    }
}

/// All mutable session state
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub session: SessionState,
    pub counters: Counters,
    pub log: MessageLog,
    pub color: Argb,
    pub active_view: Option<ViewKind>,
    pub accel_enabled: bool,
    pub connection_kind: Option<ConnectionKind>,
    pub connected_since: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.session == SessionState::Connected
    }

    /// Make `view` the active consumer. Activating the log marks it read.
    pub fn set_active_view(&mut self, view: Option<ViewKind>) {
        self.active_view = view;
        if view == Some(ViewKind::Log) {
            self.counters.unread_count = 0;
        }
    }

    pub fn view_is_active(&self, view: ViewKind) -> bool {
        self.active_view == Some(view)
    }

    pub fn mark_connected(&mut self) {
        self.session = SessionState::Connected;
        self.connected_since = Some(Utc::now());
    }

    pub fn mark_disconnected(&mut self) {
        self.session = SessionState::Disconnected;
        self.connected_since = None;
    }

    /// Log contents and unread count are cleared together
    pub fn take_message_log(&mut self) -> Vec<String> {
        self.counters.unread_count = 0;
        self.log.take()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.session,
            counters: self.counters,
            color: self.color,
            log_len: self.log.len(),
            active_view: self.active_view,
            accel_enabled: self.accel_enabled,
            connection_kind: self.connection_kind,
            connected_since: self.connected_since,
            pending_operations: 0,
        }
    }
}

/// Read-only copy of the session state for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub counters: Counters,
    pub color: Argb,
    pub log_len: usize,
    pub active_view: Option<ViewKind>,
    pub accel_enabled: bool,
    pub connection_kind: Option<ConnectionKind>,
    pub connected_since: Option<DateTime<Utc>>,
    /// Operations issued but not yet resolved
    pub pending_operations: usize,
}
