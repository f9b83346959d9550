//! Typed notifications from the session to consumer views
//!
//! Consumers subscribe per view. A notification is only delivered when its
//! target view is the active one, and always in the order the session
//! emitted it.

use crate::protocol::Argb;
use crate::session::state::ViewKind;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::trace;

/// Event kinds a view can observe
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Connected,
    /// Clean disconnect, failed connect, or lost connection
    Disconnected,
    Published,
    Received,
    ColorChanged(Argb),
    /// The message log has new text
    NewText,
    /// Unread count changed
    Unread,
    Alert { message: String },
    /// Connect failed with the broker-unavailable code
    BrokerUnavailable,
}

/// A notification scoped to one view
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub target: ViewKind,
    pub event: NotificationEvent,
}

impl Notification {
    pub fn message(&self) -> Option<&str> {
        match &self.event {
            NotificationEvent::Alert { message } => Some(message),
            _ => None,
        }
    }
}

/// Subscription registry keyed by view
#[derive(Debug, Default)]
pub struct NotificationBus {
    subscribers: HashMap<ViewKind, Vec<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every notification scoped to `view`
    pub fn subscribe(&mut self, view: ViewKind) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(view).or_default().push(tx);
        rx
    }

    /// Emit to `target` if it is the active view. Returns whether it fired.
    pub fn emit_if_active(
        &mut self,
        active: Option<ViewKind>,
        target: ViewKind,
        event: NotificationEvent,
    ) -> bool {
        if active != Some(target) {
            trace!(?target, ?event, "Notification skipped, view not active");
            return false;
        }
        self.deliver(target, event);
        true
    }

    /// Emit to whichever view is active, if any
    pub fn emit_to_active(&mut self, active: Option<ViewKind>, event: NotificationEvent) -> bool {
        match active {
            Some(target) => {
                self.deliver(target, event);
                true
            }
            None => false,
        }
    }

    /// Emit to the active view when it shows the unread badge
    pub fn emit_if_badge_view(&mut self, active: Option<ViewKind>, event: NotificationEvent) -> bool {
        match active {
            Some(view) if view.is_badge_target() => self.emit_to_active(active, event),
            _ => {
                trace!(?active, ?event, "No badge view active, notification dropped");
                false
            }
        }
    }

    fn deliver(&mut self, target: ViewKind, event: NotificationEvent) {
        if let Some(senders) = self.subscribers.get_mut(&target) {
            let notification = Notification { target, event };
            senders.retain(|tx| tx.send(notification.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self, view: ViewKind) -> usize {
        self.subscribers.get(&view).map_or(0, Vec::len)
    }
}
